use basalt_types::{BasaltError, CommandFailure, Result};
use mongodb::bson::{Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const APP_NAME: &str = "basalt-operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Talk to exactly this host instead of discovering the topology.
    pub direct: bool,
    /// Bound on connection setup and server selection.
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn direct(timeout: Duration) -> Self {
        Self {
            direct: true,
            timeout,
        }
    }

    pub fn discover(timeout: Duration) -> Self {
        Self {
            direct: false,
            timeout,
        }
    }
}

/// Opens administrative sessions against a MongoDB endpoint.
pub trait DatabaseConnector: Send + Sync {
    type Session: AdminSession;

    fn connect(
        &self,
        uri: &str,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

pub trait AdminSession: Send + Sync {
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Runs `command` against the `admin` database. A reply with `ok: 0`
    /// surfaces as [`BasaltError::Command`].
    fn run_admin_command(&self, command: Document)
    -> impl Future<Output = Result<Document>> + Send;

    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

/// Name of a command document, i.e. its first key.
pub fn command_name(command: &Document) -> String {
    command.keys().next().cloned().unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl DatabaseConnector for MongoDriver {
    type Session = DriverSession;

    async fn connect(&self, uri: &str, options: ConnectOptions) -> Result<DriverSession> {
        let mut client_options = ClientOptions::parse(uri).await?;
        client_options.direct_connection = Some(options.direct);
        client_options.connect_timeout = Some(options.timeout);
        client_options.server_selection_timeout = Some(options.timeout);
        client_options.app_name = Some(APP_NAME.to_string());

        debug!(uri = %uri, direct = options.direct, "Connecting to MongoDB");
        let client = Client::with_options(client_options)?;
        Ok(DriverSession { client })
    }
}

pub struct DriverSession {
    client: Client,
}

impl AdminSession for DriverSession {
    async fn ping(&self) -> Result<()> {
        self.run_admin_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn run_admin_command(&self, command: Document) -> Result<Document> {
        let name = command_name(&command);
        self.client
            .database("admin")
            .run_command(command)
            .await
            .map_err(|e| into_command_failure(&name, e))
    }

    async fn disconnect(self) {
        self.client.shutdown().await;
    }
}

fn into_command_failure(command: &str, error: mongodb::error::Error) -> BasaltError {
    match error.kind.as_ref() {
        ErrorKind::Command(failure) => CommandFailure::new(command, failure.message.clone())
            .with_code(failure.code, failure.code_name.clone())
            .into(),
        _ => BasaltError::Mongo(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_name_is_the_first_key() {
        let command = doc! { "replSetInitiate": { "_id": "demo-shard0" }, "comment": "x" };
        assert_eq!(command_name(&command), "replSetInitiate");
        assert_eq!(command_name(&Document::new()), "");
    }
}
