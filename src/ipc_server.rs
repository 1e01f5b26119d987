//! UDP IPC server
//!
//! A single-owner dispatch loop: one socket, one [`RequestHandler`]. Each
//! turn waits up to the poll interval for a request datagram, answers it on
//! the same socket and then delivers any queued change notifications.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::ipc_types::SubscriberTarget;
use crate::loader::load_descriptions;
use crate::store::{MemoryStore, Store};
use crate::transport::UdpTransport;

/// IPC endpoint serving one in-memory object model
#[derive(Debug)]
pub struct IpcServer {
    socket: UdpSocket,
    handler: RequestHandler<MemoryStore>,
    running: Arc<AtomicBool>,
    buffer: Vec<u8>,
}

impl IpcServer {
    /// Bind the IPC socket and preload any configured definitions
    pub fn bind(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut store = MemoryStore::default();
        if let Some(path) = &config.definitions {
            let descriptions = load_descriptions(path)?;
            for description in &descriptions {
                description.register(store.definitions_mut())?;
            }
            info!(count = descriptions.len(), path = %path.display(), "loaded definitions");
        }

        let socket = UdpSocket::bind(config.ipc_address)?;
        socket.set_read_timeout(Some(Duration::from_millis(config.poll_interval_ms)))?;
        let transport = UdpTransport::new(socket.try_clone()?);
        let handler =
            RequestHandler::new(store, transport).with_max_message_len(config.max_message_len);

        Ok(Self {
            socket,
            handler,
            running: Arc::new(AtomicBool::new(true)),
            buffer: vec![0; config.max_message_len],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Flag that keeps [`IpcServer::run`] looping; clear it to stop
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn handler(&self) -> &RequestHandler<MemoryStore> {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut RequestHandler<MemoryStore> {
        &mut self.handler
    }

    /// Serve requests until the running flag clears
    pub fn run(&mut self) -> Result<()> {
        info!(address = %self.local_addr()?, "IPC server listening");
        while self.running.load(Ordering::SeqCst) {
            self.poll_once()?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    /// Handle at most one request, then pump change notifications
    ///
    /// Returns whether a datagram was received.
    pub fn poll_once(&mut self) -> Result<bool> {
        let received = match self.socket.recv_from(&mut self.buffer) {
            Ok((len, from)) => {
                self.dispatch(len, from)?;
                true
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                false
            }
            Err(e) => return Err(e.into()),
        };

        let delivered = self.handler.process_changes();
        if delivered > 0 {
            debug!(delivered, "change notifications sent");
        }
        Ok(received)
    }

    fn dispatch(&mut self, len: usize, from: SocketAddr) -> Result<()> {
        let target = SubscriberTarget::new(from, 0);
        match self.handler.handle_message(&self.buffer[..len], target) {
            Ok(Some(reply)) => {
                self.socket.send_to(&reply, from)?;
            }
            Ok(None) => {}
            Err(e) => warn!(from = %from, error = %e, "request failed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            ipc_address: "127.0.0.1:0".parse().unwrap(),
            poll_interval_ms: 200,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_request_reply_over_udp() {
        let mut server = IpcServer::bind(&config()).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        client
            .send_to(
                b"<Request><Type>Disconnect</Type></Request>",
                server.local_addr().unwrap(),
            )
            .unwrap();
        assert!(server.poll_once().unwrap());

        let mut buf = [0u8; 256];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "<Response><Type>Disconnect</Type><Code>200</Code></Response>"
        );
    }

    #[test]
    fn test_idle_poll_and_stop_flag() {
        let mut server = IpcServer::bind(&config()).unwrap();
        assert!(!server.poll_once().unwrap());

        server.running().store(false, Ordering::SeqCst);
        server.run().unwrap();
    }

    #[test]
    fn test_preloaded_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.json");
        std::fs::write(
            &path,
            r#"[{"ObjectID": 1000, "SerialisationName": "Test", "MaximumInstances": 2}]"#,
        )
        .unwrap();

        let server = IpcServer::bind(&ClientConfig {
            definitions: Some(path),
            ..config()
        })
        .unwrap();
        assert!(server.handler().store().definitions().lookup_object(1000).is_some());
    }
}
