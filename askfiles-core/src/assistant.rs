//! Question answering over uploaded files
//!
//! [`Assistant`] ties the upstream backend, the invocation policy and the
//! activation table together. It resolves which files a question may use,
//! rejects bad requests before anything is sent upstream, and reports which
//! files an answer was grounded on.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::activation::{ActivationRecord, ActivationStore};
use crate::error::{Error, Result};
use crate::gemini::GenerativeBackend;
use crate::policy::InvocationPolicy;
use crate::types::{
    normalize_file_ref, ChatRequest, ChatResponse, ChatTurn, FilePart, FileState, GenerationMode,
    RemoteFile, UploadedFile,
};

/// Media types the upstream API accepts for question answering
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/markdown",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-powerpoint",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// Mime type assumed when upstream cannot tell us one
const FALLBACK_MIME_TYPE: &str = "text/plain";

pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// A remote file annotated with its activation state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWithStatus {
    #[serde(flatten)]
    pub file: RemoteFile,
    pub is_active: bool,
    pub status: ActivationRecord,
}

/// One page of files plus activation counts for that page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub files: Vec<FileWithStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// Files returned after filtering
    pub count: usize,
    /// Files upstream on this page
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Upstream storage broken down by processing state
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub total: usize,
    pub active: usize,
    pub processing: usize,
    pub failed: usize,
    pub total_size: u64,
    /// Files excluded from "all files" questions
    pub deactivated: usize,
}

impl FileStats {
    fn collect(files: &[RemoteFile], activation: &ActivationStore) -> Self {
        let mut stats = FileStats {
            total: files.len(),
            ..Default::default()
        };
        for file in files {
            match file.state {
                FileState::Active => stats.active += 1,
                FileState::Processing => stats.processing += 1,
                FileState::Failed => stats.failed += 1,
                FileState::Unspecified => {}
            }
            stats.total_size += file.size_bytes.unwrap_or(0);
            if !activation.is_active(&file.id) {
                stats.deactivated += 1;
            }
        }
        stats
    }
}

/// Model and storage summary for the settings view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub current_model: String,
    pub available_models: Vec<String>,
    pub files: FileStats,
}

/// Answers questions using uploaded files as context
pub struct Assistant {
    backend: Arc<dyn GenerativeBackend>,
    policy: InvocationPolicy,
    activation: Arc<ActivationStore>,
}

impl Assistant {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        policy: InvocationPolicy,
        activation: Arc<ActivationStore>,
    ) -> Self {
        Self {
            backend,
            policy,
            activation,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    pub fn policy(&self) -> &InvocationPolicy {
        &self.policy
    }

    pub fn activation(&self) -> &ActivationStore {
        &self.activation
    }

    /// Answer a question.
    ///
    /// File selection, in order of precedence:
    /// 1. `file_uri`: must be active and exist upstream
    /// 2. `file_uris`: narrowed to the active ones, at least one must remain,
    ///    and every remaining one must exist upstream
    /// 3. neither: every active uploaded file
    pub async fn ask(&self, request: ChatRequest) -> Result<ChatResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is required".to_string()));
        }

        let explicit = request
            .file_uri
            .as_deref()
            .map(normalize_file_ref)
            .filter(|id| !id.is_empty());
        let listed: Vec<String> = request
            .file_uris
            .unwrap_or_default()
            .iter()
            .map(|uri| normalize_file_ref(uri))
            .filter(|id| !id.is_empty())
            .collect();

        let resolved = if let Some(id) = &explicit {
            if !self.activation.is_active(id) {
                return Err(Error::FileInactive(id.clone()));
            }
            vec![self.resolve_part(id).await?]
        } else if !listed.is_empty() {
            let active = self.activation.filter_active(&listed);
            if active.is_empty() {
                return Err(Error::NoActiveFiles);
            }
            let mut parts = Vec::with_capacity(active.len());
            for id in &active {
                parts.push(self.resolve_part(id).await?);
            }
            parts
        } else {
            self.all_active_parts().await?
        };

        let (ids_used, files): (Vec<String>, Vec<FilePart>) = resolved.into_iter().unzip();
        let history: Vec<ChatTurn> = request.conversation_history.unwrap_or_default();
        let mode = GenerationMode::for_history(&history);

        tracing::info!(
            files = ids_used.len(),
            turns = history.len(),
            mode = ?mode,
            "Answering question"
        );

        let backend = self.backend.as_ref();
        let files = files.as_slice();
        let turns = history.as_slice();
        let response = self
            .policy
            .invoke(mode, move |model, mode| async move {
                let turns: &[ChatTurn] = match mode {
                    GenerationMode::Chat => turns,
                    GenerationMode::SingleShot => &[],
                };
                backend.generate(&model, files, question, turns).await
            })
            .await?;

        let file_uri = explicit
            .or_else(|| listed.first().cloned())
            .or_else(|| ids_used.first().cloned());

        Ok(ChatResponse {
            response,
            file_uri,
            file_uris_used: (!ids_used.is_empty()).then_some(ids_used),
        })
    }

    /// Look up the mime type for an explicitly named file.
    ///
    /// A file upstream reports as missing is rejected. Any other lookup
    /// failure sends the bare id as the uri and upstream gets the final say.
    async fn resolve_part(&self, file_id: &str) -> Result<(String, FilePart)> {
        let part = match self.backend.get_file(file_id).await {
            Ok(file) => part_for(&file),
            Err(e) if e.is_not_found() => return Err(Error::FileNotFound(file_id.to_string())),
            Err(e) => {
                tracing::warn!(file_id, error = %e, "File lookup failed, sending bare id");
                FilePart {
                    file_uri: file_id.to_string(),
                    mime_type: FALLBACK_MIME_TYPE.to_string(),
                }
            }
        };
        Ok((file_id.to_string(), part))
    }

    async fn all_active_parts(&self) -> Result<Vec<(String, FilePart)>> {
        let files = self.backend.list_all_files().await?;
        if files.is_empty() {
            return Err(Error::NoFiles);
        }

        let active: HashSet<String> = self
            .activation
            .filter_active(files.iter().map(|f| &f.id))
            .into_iter()
            .collect();
        if active.is_empty() {
            return Err(Error::NoActiveFiles);
        }

        Ok(files
            .iter()
            .filter(|file| active.contains(&file.id))
            .map(|file| (file.id.clone(), part_for(file)))
            .collect())
    }

    /// Upload a file after checking its media type.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str, mime_type: &str) -> Result<UploadedFile> {
        if !is_supported_mime(mime_type) {
            return Err(Error::UnsupportedMediaType(mime_type.to_string()));
        }
        if bytes.is_empty() {
            return Err(Error::InvalidInput("uploaded file is empty".to_string()));
        }

        let file = self.backend.upload_file(bytes, file_name, mime_type).await?;
        tracing::info!(file_id = %file.id, file_name, "File uploaded");

        Ok(UploadedFile {
            file_uri: file.id,
            file_name: file.display_name.unwrap_or_else(|| file_name.to_string()),
            mime_type: file.mime_type.unwrap_or_else(|| mime_type.to_string()),
            size: file.size_bytes,
        })
    }

    /// List one page of files with their activation state.
    pub async fn list_with_status(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
        include_inactive: bool,
    ) -> Result<FileListing> {
        let page = self.backend.list_files(page_size, page_token).await?;
        let total = page.files.len();

        let annotated: Vec<FileWithStatus> = page
            .files
            .into_iter()
            .map(|file| {
                let status = self
                    .activation
                    .status(&file.id)
                    .unwrap_or_else(|| ActivationRecord::untouched(&file.id));
                FileWithStatus {
                    is_active: status.active,
                    status,
                    file,
                }
            })
            .collect();

        let active = annotated.iter().filter(|f| f.is_active).count();
        let files = if include_inactive {
            annotated
        } else {
            annotated.into_iter().filter(|f| f.is_active).collect()
        };

        Ok(FileListing {
            count: files.len(),
            files,
            next_page_token: page.next_page_token,
            total,
            active,
            inactive: total - active,
        })
    }

    pub async fn file_info(&self, file_reference: &str) -> Result<RemoteFile> {
        self.backend.get_file(&normalize_file_ref(file_reference)).await
    }

    /// Delete a file upstream. Its activation record, if any, is kept.
    pub async fn delete(&self, file_reference: &str) -> Result<String> {
        let file_id = normalize_file_ref(file_reference);
        self.backend.delete_file(&file_id).await?;
        tracing::info!(
            file_id = %file_id,
            has_activation_record = self.activation.status(&file_id).is_some(),
            "File deleted"
        );
        Ok(file_id)
    }

    /// Current model and storage statistics.
    ///
    /// A failed listing is logged and reported as empty statistics.
    pub async fn usage(&self) -> UsageSummary {
        let files = match self.backend.list_all_files().await {
            Ok(files) => FileStats::collect(&files, &self.activation),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list files for usage summary");
                FileStats::default()
            }
        };

        let roster = self.policy.roster();
        UsageSummary {
            current_model: roster.current().to_string(),
            available_models: roster.models().to_vec(),
            files,
        }
    }
}

fn part_for(file: &RemoteFile) -> FilePart {
    FilePart {
        file_uri: file.uri.clone().unwrap_or_else(|| file.id.clone()),
        mime_type: file
            .mime_type
            .clone()
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_mime_types() {
        assert!(is_supported_mime("application/pdf"));
        assert!(is_supported_mime("image/webp"));
        assert!(!is_supported_mime("application/zip"));
        assert!(!is_supported_mime("video/mp4"));
    }

    #[test]
    fn test_file_stats_collect() {
        let activation = ActivationStore::in_memory();
        activation.deactivate("b");

        let file = |id: &str, state: FileState, size: u64| RemoteFile {
            id: id.to_string(),
            name: format!("files/{}", id),
            display_name: None,
            mime_type: None,
            size_bytes: Some(size),
            state,
            create_time: None,
            update_time: None,
            uri: None,
        };
        let files = vec![
            file("a", FileState::Active, 100),
            file("b", FileState::Processing, 50),
            file("c", FileState::Failed, 0),
        ];

        let stats = FileStats::collect(&files, &activation);
        assert_eq!(
            stats,
            FileStats {
                total: 3,
                active: 1,
                processing: 1,
                failed: 1,
                total_size: 150,
                deactivated: 1,
            }
        );
    }

    #[test]
    fn test_part_for_falls_back_to_id() {
        let file = RemoteFile {
            id: "abc".into(),
            name: "files/abc".into(),
            display_name: None,
            mime_type: None,
            size_bytes: None,
            state: FileState::Active,
            create_time: None,
            update_time: None,
            uri: None,
        };
        let part = part_for(&file);
        assert_eq!(part.file_uri, "abc");
        assert_eq!(part.mime_type, "text/plain");
    }
}
