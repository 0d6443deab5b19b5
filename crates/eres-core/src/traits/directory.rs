use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

/// External system of record mapping user IDs to email addresses.
///
/// Users without an address are simply absent from the returned map.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn emails_for(&self, user_ids: &[String]) -> Result<HashMap<String, String>>;
}
