use std::sync::Arc;

use shared::domain::{Client, ClientInput};
use tracing::{error, info};

use crate::{error::InvoiceError, gateway::PersistenceGateway};

/// The billing parties offered by the client picker.
pub struct ClientDirectoryService {
    gateway: Arc<PersistenceGateway>,
    clients: Vec<Client>,
    last_error: Option<InvoiceError>,
}

impl ClientDirectoryService {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self {
            gateway,
            clients: Vec::new(),
            last_error: None,
        }
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// The failure behind the most recent empty listing, if any.
    pub fn last_error(&self) -> Option<&InvoiceError> {
        self.last_error.as_ref()
    }

    /// Reloads all clients, newest first. A failed fetch leaves the picker
    /// usable with an empty list.
    pub async fn list(&mut self) -> &[Client] {
        match self.gateway.list_clients().await {
            Ok(clients) => {
                self.clients = clients;
                self.last_error = None;
            }
            Err(err) => {
                error!("clients: failed to fetch client directory: {err:#}");
                self.clients.clear();
                self.last_error = Some(InvoiceError::transient(&err, "Failed to load clients"));
            }
        }
        &self.clients
    }

    /// Creates a client and returns it as the current selection.
    pub async fn create(&mut self, input: ClientInput) -> Result<Client, InvoiceError> {
        let input = normalize(input);
        if input.name.is_empty() {
            return Err(InvoiceError::validation("Client name is required"));
        }

        let client = self.gateway.create_client(&input).await.map_err(|err| {
            error!("clients: failed to create client: {err:#}");
            InvoiceError::persistence(&err, "Failed to create client")
        })?;
        info!(client_id = %client.id, "clients: created client");
        self.clients.insert(0, client.clone());
        Ok(client)
    }
}

fn normalize(input: ClientInput) -> ClientInput {
    fn optional(value: Option<String>) -> Option<String> {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    ClientInput {
        name: input.name.trim().to_string(),
        email: optional(input.email),
        phone: optional(input.phone),
        address: optional(input.address),
    }
}

#[cfg(test)]
#[path = "tests/clients_tests.rs"]
mod tests;
