use crate::dispatch::{Scope, ZONE_ID};
use crate::error::{OperationError, Result};

/// Create a recordset in the related (or configured) zone
pub async fn create_recordset(scope: &mut Scope<'_>) -> Result<()> {
    let zone = scope.resource.parent_id.clone().ok_or_else(|| {
        OperationError::non_recoverable(
            "recordset needs a zone_id or a relationship to a DNS zone",
        )
    })?;
    let mut body = scope.resource.config.clone();
    body.remove(ZONE_ID);
    scope.create_once_with(body).await?;
    scope.runtime_mut().set(ZONE_ID, zone);
    Ok(())
}
