use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    apply_statements, check_table_name, clear_statement, open_session, quote_literal,
};
use crate::warehouse::Warehouse;
use crate::{PathTemplate, RunContext, StageError, StorageLocation};

fn default_format() -> String {
    "auto".to_string()
}

/// Copies JSON objects from object storage into a staging table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkLoad {
    pub table: String,
    pub bucket: String,
    /// Key template resolved against the run variables, e.g. `log_data/{{year}}/{{month}}`.
    pub key: String,
    pub region: String,
    /// `auto` or the location of a JSON paths file.
    #[serde(default = "default_format")]
    pub format: String,
    /// Credential identifier passed to the credential resolver.
    pub credentials: String,
    #[serde(default)]
    pub truncate: bool,
}

impl BulkLoad {
    pub(crate) fn validate(&self) -> Result<(), String> {
        check_table_name(&self.table)?;
        if self.bucket.trim().is_empty() {
            return Err("bucket is empty".to_string());
        }
        PathTemplate::parse(&self.key).map_err(|err| err.to_string())?;
        Ok(())
    }

    fn copy_statement(&self, location: &StorageLocation, access_key: &str, secret: &str) -> String {
        format!(
            "COPY {table}\nFROM {location}\nACCESS_KEY_ID {access_key}\nSECRET_ACCESS_KEY {secret}\nFORMAT AS JSON {format}\nREGION {region}",
            table = self.table,
            location = quote_literal(&location.to_string()),
            access_key = quote_literal(access_key),
            secret = quote_literal(secret),
            format = quote_literal(&self.format),
            region = quote_literal(&self.region),
        )
    }

    pub(crate) async fn execute(
        &self,
        warehouse: &dyn Warehouse,
        ctx: &RunContext,
    ) -> Result<(), StageError> {
        let location = StorageLocation::resolve(&self.bucket, &self.key, ctx.vars())?;
        let credentials = ctx.credential(&self.credentials)?;

        let mut statements = Vec::with_capacity(2);
        if self.truncate {
            info!(table = %self.table, "Clearing data from destination table");
            statements.push(clear_statement(&self.table));
        }
        statements.push(self.copy_statement(
            &location,
            &credentials.access_key_id,
            &credentials.secret_access_key,
        ));
        debug!(
            table = %self.table,
            "{}",
            self.copy_statement(&location, &credentials.access_key_id, "***")
        );

        info!(table = %self.table, %location, "Copying data from storage");
        let mut session = open_session(warehouse, &self.table).await?;
        let rows = apply_statements(session.as_mut(), &self.table, &statements).await?;
        info!(table = %self.table, rows, "Finished copying data from storage");

        Ok(())
    }
}
