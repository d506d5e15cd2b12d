use async_trait::async_trait;
use wallet_plugins_sdk::Permission;

use crate::{api::ApiContext, error::Result, profile::Profile};

use super::{PluginService, ServiceApi};

pub struct ProfileService;

#[async_trait]
impl PluginService for ProfileService {
    fn permission(&self) -> Permission {
        Permission::Profile
    }

    fn accessor(&self) -> &'static str {
        "profile"
    }

    async fn api(&self, ctx: &ApiContext) -> Result<ServiceApi> {
        Ok(ServiceApi::Profile(ProfileApi::new(&ctx.profile)))
    }
}

/// Read-only identity of the active profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileApi {
    id: String,
    name: String,
}

impl ProfileApi {
    pub fn new(profile: &Profile) -> Self {
        Self {
            id: profile.id().to_string(),
            name: profile.name().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
