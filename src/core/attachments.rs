//! Client-local attachment records and their upload lifecycle.
//!
//! An attachment is created when the user adds a local file, mutated by the
//! upload task through [`UploadEvent`]s, and either promoted to a message
//! attachment reference on send or discarded on removal. Removal of an
//! in-flight upload cancels the network call and deletes the record;
//! a failed upload keeps the record visible with its error message.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::client::ApiClient;
use crate::api::UploadError;

#[derive(Debug)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub path: PathBuf,
    pub size: Option<u64>,
    pub progress: u8,
    pub uploaded_file_id: Option<String>,
    pub error: Option<String>,
    cancel: Option<CancellationToken>,
}

impl Attachment {
    /// Uploaded successfully and usable in a send.
    pub fn is_ready(&self) -> bool {
        self.uploaded_file_id.is_some() && self.error.is_none()
    }

    pub fn is_uploading(&self) -> bool {
        self.cancel.is_some()
    }
}

/// Progress reports from upload tasks, applied back onto the list by the
/// session loop. Events for ids that have since been removed are dropped.
#[derive(Clone, Debug)]
pub enum UploadEvent {
    Progress { attachment_id: String, progress: u8 },
    Completed { attachment_id: String, file_id: String },
    Failed { attachment_id: String, message: String },
    Aborted { attachment_id: String },
}

#[derive(Debug, Default)]
pub struct AttachmentList {
    items: Vec<Attachment>,
    next_id: u64,
}

impl AttachmentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Attachment] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Register a local file. Returns the attachment's temporary id.
    pub fn add(
        &mut self,
        path: PathBuf,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: Option<u64>,
    ) -> String {
        let id = format!(
            "temp-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.next_id
        );
        self.next_id += 1;
        self.items.push(Attachment {
            id: id.clone(),
            name: name.into(),
            mime_type: mime_type.into(),
            path,
            size,
            progress: 0,
            uploaded_file_id: None,
            error: None,
            cancel: None,
        });
        id
    }

    /// Server file ids of attachments that finished uploading cleanly.
    /// Still-uploading and failed attachments are excluded from a send.
    pub fn ready_file_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|attachment| attachment.error.is_none())
            .filter_map(|attachment| attachment.uploaded_file_id.clone())
            .collect()
    }

    /// Whether every attachment has either finished or failed.
    pub fn all_settled(&self) -> bool {
        self.items
            .iter()
            .all(|attachment| attachment.uploaded_file_id.is_some() || attachment.error.is_some())
    }

    /// Remove an attachment, cancelling its upload if one is in flight.
    pub fn remove(&mut self, attachment_id: &str) -> bool {
        let Some(index) = self
            .items
            .iter()
            .position(|attachment| attachment.id == attachment_id)
        else {
            return false;
        };
        let attachment = self.items.remove(index);
        if let Some(cancel) = attachment.cancel {
            cancel.cancel();
        }
        true
    }

    /// Start the upload task for one attachment. At most one upload per
    /// attachment is ever in flight; repeat calls are ignored.
    pub fn begin_upload(
        &mut self,
        attachment_id: &str,
        api: &ApiClient,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) {
        let Some(attachment) = self
            .items
            .iter_mut()
            .find(|attachment| attachment.id == attachment_id)
        else {
            return;
        };
        if attachment.cancel.is_some() || attachment.uploaded_file_id.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        attachment.cancel = Some(cancel.clone());

        let api = api.clone();
        let id = attachment.id.clone();
        let path = attachment.path.clone();
        let name = attachment.name.clone();
        let mime_type = attachment.mime_type.clone();
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let forward_events = events.clone();
            let forward_id = id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    let _ = forward_events.send(UploadEvent::Progress {
                        attachment_id: forward_id.clone(),
                        progress,
                    });
                }
            });

            let result = api
                .upload_file(&path, &name, &mime_type, progress_tx, cancel)
                .await;
            let _ = forwarder.await;
            let event = match result {
                Ok(file_id) => UploadEvent::Completed {
                    attachment_id: id,
                    file_id,
                },
                Err(UploadError::Aborted) => UploadEvent::Aborted { attachment_id: id },
                Err(UploadError::Failed(message)) => {
                    tracing::debug!("upload of {name} failed: {message}");
                    UploadEvent::Failed {
                        attachment_id: id,
                        message,
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    /// Fold one upload event into the list. Events whose attachment is gone
    /// (removed by the user mid-flight) are ignored.
    pub fn apply(&mut self, event: UploadEvent) {
        match event {
            UploadEvent::Progress {
                attachment_id,
                progress,
            } => {
                if let Some(attachment) = self.find_mut(&attachment_id) {
                    if attachment.error.is_none() {
                        attachment.progress = progress;
                    }
                }
            }
            UploadEvent::Completed {
                attachment_id,
                file_id,
            } => {
                if let Some(attachment) = self.find_mut(&attachment_id) {
                    attachment.progress = 100;
                    attachment.uploaded_file_id = Some(file_id);
                    attachment.cancel = None;
                }
            }
            UploadEvent::Failed {
                attachment_id,
                message,
            } => {
                if let Some(attachment) = self.find_mut(&attachment_id) {
                    attachment.error = Some(message);
                    attachment.cancel = None;
                }
            }
            UploadEvent::Aborted { attachment_id } => {
                // The record is normally already gone; cancellation without a
                // preceding remove still deletes it.
                self.items.retain(|attachment| attachment.id != attachment_id);
            }
        }
    }

    fn find_mut(&mut self, attachment_id: &str) -> Option<&mut Attachment> {
        self.items
            .iter_mut()
            .find(|attachment| attachment.id == attachment_id)
    }
}
