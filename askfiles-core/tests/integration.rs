//! Integration tests for askfiles-core
//!
//! Exercises the assistant end to end against an in-process backend and the
//! activation table against real files.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use askfiles_core::{
    ActivationStore, Assistant, ChatRequest, ChatTurn, Error, FilePage, FilePart, FileState,
    GenerativeBackend, InvocationPolicy, ModelRoster, RemoteFile, Result, RetryPlan, TurnRole,
};
use async_trait::async_trait;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct GenerateCall {
    model: String,
    file_uris: Vec<String>,
    history: usize,
}

/// Backend holding files in memory; listed models always answer 503.
#[derive(Default)]
struct FakeBackend {
    files: Mutex<Vec<RemoteFile>>,
    overloaded: HashSet<String>,
    calls: Mutex<Vec<GenerateCall>>,
}

impl FakeBackend {
    fn with_files(ids: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut files = backend.files.lock().unwrap();
            for id in ids {
                files.push(remote_file(id));
            }
        }
        backend
    }

    fn overloaded(mut self, models: &[&str]) -> Self {
        self.overloaded = models.iter().map(|m| m.to_string()).collect();
        self
    }

    fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn remote_file(id: &str) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: format!("files/{}", id),
        display_name: Some(format!("{}.pdf", id)),
        mime_type: Some("application/pdf".to_string()),
        size_bytes: Some(1024),
        state: FileState::Active,
        create_time: None,
        update_time: None,
        uri: Some(format!("https://files.test/v1beta/files/{}", id)),
    }
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile> {
        let mut file = remote_file(&format!("up{}", bytes.len()));
        file.display_name = Some(display_name.to_string());
        file.mime_type = Some(mime_type.to_string());
        file.size_bytes = Some(bytes.len() as u64);
        self.files.lock().unwrap().push(file.clone());
        Ok(file)
    }

    async fn list_files(&self, _: Option<u32>, _: Option<&str>) -> Result<FilePage> {
        Ok(FilePage {
            files: self.files.lock().unwrap().clone(),
            next_page_token: None,
        })
    }

    async fn get_file(&self, file_id: &str) -> Result<RemoteFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == file_id)
            .cloned()
            .ok_or_else(|| Error::Upstream {
                status: Some(404),
                message: format!("404 Not Found: file {} not found", file_id),
            })
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.files.lock().unwrap().retain(|f| f.id != file_id);
        Ok(())
    }

    async fn generate(
        &self,
        model: &str,
        files: &[FilePart],
        _question: &str,
        history: &[ChatTurn],
    ) -> Result<String> {
        self.calls.lock().unwrap().push(GenerateCall {
            model: model.to_string(),
            file_uris: files.iter().map(|f| f.file_uri.clone()).collect(),
            history: history.len(),
        });
        if self.overloaded.contains(model) {
            return Err(Error::Upstream {
                status: Some(503),
                message: "503 Service Unavailable: The model is overloaded.".to_string(),
            });
        }
        Ok(format!("answer from {}", model))
    }
}

fn assistant_with(backend: Arc<FakeBackend>, activation: Arc<ActivationStore>) -> Assistant {
    askfiles_core::logging::init_test();
    let roster = ModelRoster::new(vec![
        "model-a".to_string(),
        "model-b".to_string(),
        "model-c".to_string(),
    ])
    .unwrap();
    let policy = InvocationPolicy::new(
        roster,
        RetryPlan::new(3, Duration::from_millis(1)),
        RetryPlan::new(2, Duration::from_millis(1)),
    );
    Assistant::new(backend, policy, activation)
}

fn question(text: &str) -> ChatRequest {
    ChatRequest {
        question: text.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_no_files_rejected_before_model_call() {
    let backend = Arc::new(FakeBackend::default());
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let err = assistant.ask(question("anything?")).await.unwrap_err();
    assert!(matches!(err, Error::NoFiles));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_all_inactive_rejected_before_model_call() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("a");
    activation.deactivate("b");
    let assistant = assistant_with(backend.clone(), activation);

    let err = assistant.ask(question("anything?")).await.unwrap_err();
    assert!(matches!(err, Error::NoActiveFiles));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_blank_question_rejected() {
    let backend = Arc::new(FakeBackend::with_files(&["a"]));
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let err = assistant.ask(question("   ")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_all_files_question_uses_only_active_files() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b", "c"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("b");
    let assistant = assistant_with(backend.clone(), activation);

    let answer = assistant.ask(question("summarize")).await.unwrap();
    assert_eq!(answer.response, "answer from model-a");
    assert_eq!(
        answer.file_uris_used,
        Some(vec!["a".to_string(), "c".to_string()])
    );
    assert_eq!(answer.file_uri.as_deref(), Some("a"));

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].file_uris,
        vec![
            "https://files.test/v1beta/files/a".to_string(),
            "https://files.test/v1beta/files/c".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_explicit_inactive_file_rejected() {
    let backend = Arc::new(FakeBackend::with_files(&["a"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("a");
    let assistant = assistant_with(backend.clone(), activation);

    let request = ChatRequest {
        question: "what is in it?".to_string(),
        file_uri: Some("files/a".to_string()),
        ..Default::default()
    };
    let err = assistant.ask(request).await.unwrap_err();
    assert!(matches!(err, Error::FileInactive(id) if id == "a"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_explicit_unknown_file_rejected() {
    let backend = Arc::new(FakeBackend::with_files(&["a"]));
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let request = ChatRequest {
        question: "what is in it?".to_string(),
        file_uri: Some("does-not-exist".to_string()),
        ..Default::default()
    };
    let err = assistant.ask(request).await.unwrap_err();
    assert!(matches!(&err, Error::FileNotFound(id) if id == "does-not-exist"));
    assert!(err.is_caller_error());

    let request = ChatRequest {
        question: "compare".to_string(),
        file_uris: Some(vec!["a".to_string(), "gone".to_string()]),
        ..Default::default()
    };
    let err = assistant.ask(request).await.unwrap_err();
    assert!(matches!(err, Error::FileNotFound(id) if id == "gone"));

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_listed_files_are_filtered() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b", "c"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("a");
    let assistant = assistant_with(backend.clone(), activation.clone());

    let request = ChatRequest {
        question: "compare".to_string(),
        file_uris: Some(vec!["a".to_string(), "c".to_string()]),
        ..Default::default()
    };
    let answer = assistant.ask(request).await.unwrap();
    assert_eq!(answer.file_uris_used, Some(vec!["c".to_string()]));

    activation.deactivate("c");
    let request = ChatRequest {
        question: "compare".to_string(),
        file_uris: Some(vec!["a".to_string(), "c".to_string()]),
        ..Default::default()
    };
    let err = assistant.ask(request).await.unwrap_err();
    assert!(matches!(err, Error::NoActiveFiles));
}

#[tokio::test]
async fn test_history_is_threaded() {
    let backend = Arc::new(FakeBackend::with_files(&["a"]));
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let request = ChatRequest {
        question: "and then?".to_string(),
        conversation_history: Some(vec![
            ChatTurn {
                role: TurnRole::User,
                parts: "what happened first?".to_string(),
            },
            ChatTurn {
                role: TurnRole::Model,
                parts: "the intro".to_string(),
            },
        ]),
        ..Default::default()
    };
    assistant.ask(request).await.unwrap();
    assert_eq!(backend.calls()[0].history, 2);
}

#[tokio::test]
async fn test_overloaded_primary_falls_back_and_sticks() {
    let backend = Arc::new(FakeBackend::with_files(&["a"]).overloaded(&["model-a"]));
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let answer = assistant.ask(question("hello?")).await.unwrap();
    assert_eq!(answer.response, "answer from model-b");
    assert_eq!(assistant.policy().roster().current(), "model-b");

    let calls: Vec<String> = backend.calls().into_iter().map(|c| c.model).collect();
    assert_eq!(calls, vec!["model-a", "model-a", "model-a", "model-b"]);

    // The next question starts on the promoted model
    assistant.ask(question("again?")).await.unwrap();
    assert_eq!(backend.calls().last().unwrap().model, "model-b");
}

#[tokio::test]
async fn test_every_model_overloaded() {
    let backend = Arc::new(
        FakeBackend::with_files(&["a"]).overloaded(&["model-a", "model-b", "model-c"]),
    );
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let err = assistant.ask(question("hello?")).await.unwrap_err();
    assert!(matches!(err, Error::AllModelsUnavailable { .. }));
    // 3 primary attempts plus 2 for each fallback
    assert_eq!(backend.calls().len(), 7);
    assert_eq!(assistant.policy().roster().current(), "model-a");
}

#[tokio::test]
async fn test_listing_counts_and_filtering() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b", "c"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("b");
    let assistant = assistant_with(backend, activation);

    let visible = assistant.list_with_status(None, None, false).await.unwrap();
    assert_eq!(visible.count, 2);
    assert_eq!(visible.total, 3);
    assert_eq!(visible.active, 2);
    assert_eq!(visible.inactive, 1);

    let all = assistant.list_with_status(None, None, true).await.unwrap();
    assert_eq!(all.count, 3);
    let b = all.files.iter().find(|f| f.file.id == "b").unwrap();
    assert!(!b.is_active);
    assert!(b.status.deactivated_at.is_some());
}

#[tokio::test]
async fn test_upload_checks_media_type() {
    let backend = Arc::new(FakeBackend::default());
    let assistant = assistant_with(backend.clone(), Arc::new(ActivationStore::in_memory()));

    let err = assistant
        .upload(b"PK".to_vec(), "archive.zip", "application/zip")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedMediaType(_)));

    let uploaded = assistant
        .upload(b"hello".to_vec(), "notes.txt", "text/plain")
        .await
        .unwrap();
    assert_eq!(uploaded.file_name, "notes.txt");
    assert_eq!(uploaded.size, Some(5));
}

#[tokio::test]
async fn test_delete_keeps_activation_record() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("a");
    let assistant = assistant_with(backend.clone(), activation.clone());

    let deleted = assistant.delete("files/a").await.unwrap();
    assert_eq!(deleted, "a");
    assert!(activation.status("a").is_some());

    let known: Vec<String> = backend.files.lock().unwrap().iter().map(|f| f.id.clone()).collect();
    let orphans = activation.orphans(&known);
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].file_id, "a");
}

#[tokio::test]
async fn test_usage_summary() {
    let backend = Arc::new(FakeBackend::with_files(&["a", "b"]));
    let activation = Arc::new(ActivationStore::in_memory());
    activation.deactivate("a");
    let assistant = assistant_with(backend, activation);

    let usage = assistant.usage().await;
    assert_eq!(usage.current_model, "model-a");
    assert_eq!(usage.available_models.len(), 3);
    assert_eq!(usage.files.total, 2);
    assert_eq!(usage.files.total_size, 2048);
    assert_eq!(usage.files.deactivated, 1);
}

#[test]
fn test_activation_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/file-statuses.json");

    {
        let store = ActivationStore::open(&path);
        store.deactivate("a");
        store.deactivate("b");
        store.reactivate("b");
    }

    let reopened = ActivationStore::open(&path);
    assert!(!reopened.is_active("a"));
    assert!(reopened.is_active("b"));
    let b = reopened.status("b").unwrap();
    assert!(b.deactivated_at.is_some());
    assert!(b.reactivated_at.is_some());
    assert_eq!(reopened.records().len(), 2);
}
