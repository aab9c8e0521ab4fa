//! Channel-based transfers: managed files and raw streams.
//!
//! File mode carries its metadata (name, byte length, request id) inside the
//! channel's routing key; the bytes themselves are the channel payload. The
//! receiver verifies the advertised length and reports completion through the
//! bus. Stream mode is unmanaged: the route carries only a request id and the
//! endpoints own the bytes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use tether_core::routes::{self, FileRoute};
use tether_core::{status, Error};

use crate::engine::Tether;
use crate::event::Event;
use crate::transport::Channel;

/// Describes one outbound file transfer.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    node_id: String,
    path: PathBuf,
    target_name: Option<String>,
    request_id: Option<String>,
    start_offset: u64,
    length: Option<u64>,
}

impl FileTransfer {
    pub fn new(node_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            path: path.into(),
            target_name: None,
            request_id: None,
            start_offset: 0,
            length: None,
        }
    }

    /// Name advertised to the receiver instead of the local file name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    /// Caller-chosen request id; generated when absent.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Byte offset to start from, for resumed transfers.
    pub fn offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Byte count to send; defaults to the rest of the file.
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

impl Tether {
    /// Starts a file transfer and returns its request id. Runs in the
    /// background; completion is broadcast as [`Event::SendFileResult`].
    /// Misuse (disconnected, unreadable file, offset past the end) fails
    /// synchronously instead.
    pub async fn send_file(self: &Arc<Self>, transfer: FileTransfer) -> Result<String, Error> {
        self.assert_connected()?;

        let meta = tokio::fs::metadata(&transfer.path).await?;
        if transfer.start_offset > meta.len() {
            return Err(Error::config(format!(
                "offset {} is past the end of {} ({} bytes)",
                transfer.start_offset,
                transfer.path.display(),
                meta.len()
            )));
        }
        let advertised = transfer
            .length
            .unwrap_or(meta.len() - transfer.start_offset);

        let name = match &transfer.target_name {
            Some(name) => name.clone(),
            None => transfer
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::config("transfer path has no file name"))?,
        };

        let request_id = transfer
            .request_id
            .clone()
            .unwrap_or_else(routes::request_id);
        let route = FileRoute::new(&name, advertised, request_id.clone()).encode();

        let engine = self.clone();
        let id = request_id.clone();
        tokio::spawn(async move {
            let outcome = engine
                .stream_file_out(&transfer, &route, advertised)
                .await;
            let code = match outcome {
                Ok(()) => status::SUCCESS,
                Err(e) => {
                    tracing::error!(
                        node_id = transfer.node_id,
                        path = %transfer.path.display(),
                        error = %e,
                        "file transfer failed"
                    );
                    status::REQUEST_FAILED
                }
            };
            engine.broadcast(Event::SendFileResult {
                status: code,
                request_id: id,
            });
        });

        Ok(request_id)
    }

    async fn stream_file_out(
        &self,
        transfer: &FileTransfer,
        route: &str,
        advertised: u64,
    ) -> anyhow::Result<()> {
        let mut channel = self
            .transport
            .open_channel(&transfer.node_id, route)
            .await?;

        let result = async {
            let mut file = tokio::fs::File::open(&transfer.path).await?;
            file.seek(std::io::SeekFrom::Start(transfer.start_offset))
                .await?;
            let mut limited = file.take(advertised);

            let mut writer = channel
                .take_writer()
                .ok_or_else(|| anyhow::anyhow!("channel writer already taken"))?;
            let sent = tokio::io::copy(&mut limited, &mut writer).await?;
            writer.shutdown().await?;
            anyhow::ensure!(
                sent == advertised,
                "file shrank mid-transfer: sent {sent} of {advertised} bytes"
            );
            tracing::debug!(route, bytes = sent, "file transfer sent");
            Ok(())
        }
        .await;

        // a half-written channel must not be left open for the receiver
        if result.is_err() {
            channel.close();
        }
        result
    }

    /// Opens a raw stream to a peer. Returns the request id and the channel;
    /// the caller owns the writable half.
    pub async fn open_stream(&self, node_id: &str) -> Result<(String, Channel), Error> {
        self.assert_connected()?;
        let request_id = routes::request_id();
        let route = routes::stream_route(&request_id);
        let channel = self
            .transport
            .open_channel(node_id, &route)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tracing::debug!(node_id, request_id, "stream opened");
        Ok((request_id, channel))
    }

    /// Receiver side of a file transfer; spawned for every inbound channel on
    /// the file route prefix.
    pub(crate) async fn receive_file(&self, mut channel: Channel) {
        let meta = match FileRoute::decode(channel.route()) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::error!(route = channel.route(), error = %e, "undecodable file route");
                channel.close();
                return;
            }
        };

        // only the final path component of the advertised name is trusted
        let file_name = meta
            .name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_owned())
            .unwrap_or_else(|| meta.request_id.clone().into());
        let dir = self.config.transfer.incoming_dir.clone();
        let path = dir.join(file_name);

        let outcome = Self::write_incoming(&dir, &path, &mut channel).await;
        let code = match outcome {
            Ok(received) => {
                // an integrity mismatch is a logged discrepancy, not a failure
                if received != meta.length {
                    tracing::warn!(
                        request_id = meta.request_id,
                        received,
                        advertised = meta.length,
                        "received size differs from advertised size"
                    );
                }
                status::SUCCESS
            }
            Err(e) => {
                tracing::error!(
                    request_id = meta.request_id,
                    path = %path.display(),
                    error = %e,
                    "file receive failed"
                );
                channel.close();
                status::REQUEST_FAILED
            }
        };
        self.broadcast(Event::FileReceived {
            status: code,
            request_id: meta.request_id,
            path,
            original_name: meta.name,
        });
    }

    async fn write_incoming(
        dir: &Path,
        path: &Path,
        channel: &mut Channel,
    ) -> anyhow::Result<u64> {
        tokio::fs::create_dir_all(dir).await?;
        let mut reader = channel
            .take_reader()
            .ok_or_else(|| anyhow::anyhow!("channel reader already taken"))?;
        let mut file = tokio::fs::File::create(path).await?;
        let received = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        tracing::debug!(path = %path.display(), bytes = received, "file received");
        Ok(received)
    }
}
