//! MongoDB Node
//!
//! Runs the admin commands against a live mongod through the official driver.

use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;

use super::ReplicaSetAdmin;
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};

/// Connection to a single mongod, scoped to one bootstrap run
pub struct MongoNode {
    client: Client,
    address: String,
}

impl MongoNode {
    /// Build a client for the configured node
    ///
    /// The driver connects lazily; unreachable nodes surface on the first command.
    pub async fn connect(config: &BootstrapConfig) -> Result<Self> {
        let address = config.display_address().to_string();
        let uri = config.connection_uri();

        let mut options = ClientOptions::parse(uri.as_str())
            .await
            .map_err(|e| classify(&address, e))?;

        options.app_name = Some(config.node.app_name.clone());
        options.connect_timeout = Some(config.connect_timeout());
        options.server_selection_timeout = Some(config.server_selection_timeout());

        // An uninitiated node cannot be discovered as a set member, so talk to it directly.
        // SRV strings and explicit directConnection in the URI are left alone.
        if options.direct_connection.is_none()
            && options.hosts.len() == 1
            && !uri.starts_with("mongodb+srv://")
        {
            options.direct_connection = Some(config.node.direct_connection);
        }

        let client = Client::with_options(options).map_err(|e| classify(&address, e))?;
        tracing::debug!("Created client for {}", address);

        Ok(Self { client, address })
    }

    /// Run a command against the `admin` database
    async fn admin_command(&self, command: Document) -> Result<Document> {
        self.client
            .database("admin")
            .run_command(command)
            .await
            .map_err(|e| classify(&self.address, e))
    }

    /// Release the connection pool
    pub async fn close(self) {
        tracing::debug!("Closing connection to {}", self.address);
        self.client.shutdown().await;
    }
}

#[async_trait::async_trait]
impl ReplicaSetAdmin for MongoNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn current_config(&self) -> Result<Document> {
        let response = self.admin_command(doc! { "replSetGetConfig": 1 }).await?;
        tracing::debug!("replSetGetConfig response: {}", response);

        response
            .get_document("config")
            .cloned()
            .map_err(|_| Error::MalformedResponse("replSetGetConfig returned no config".into()))
    }

    async fn initiate(&self, config: &Document) -> Result<()> {
        let response = self
            .admin_command(doc! { "replSetInitiate": config.clone() })
            .await?;
        tracing::debug!("replSetInitiate response: {}", response);
        Ok(())
    }

    async fn is_writable_primary(&self) -> Result<bool> {
        let response = self.admin_command(doc! { "hello": 1 }).await?;

        Ok(response
            .get_bool("isWritablePrimary")
            .or_else(|_| response.get_bool("ismaster"))
            .unwrap_or(false))
    }
}

/// Map a driver error onto the bootstrap error taxonomy
fn classify(address: &str, err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => Error::from_command(address, cmd.code, &cmd.code_name, &cmd.message),
        ErrorKind::ServerSelection { message, .. } => Error::Connectivity {
            address: address.to_string(),
            reason: message.clone(),
        },
        ErrorKind::ConnectionPoolCleared { message, .. } => Error::Connectivity {
            address: address.to_string(),
            reason: message.clone(),
        },
        ErrorKind::Io(io) => Error::Connectivity {
            address: address.to_string(),
            reason: io.to_string(),
        },
        _ => Error::Driver(err),
    }
}
