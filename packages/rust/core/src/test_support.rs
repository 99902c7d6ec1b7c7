//! Scripted collaborators for stage and pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use copilot_llm::{BackendProvider, Generation, GenerationBackend, Sampling};
use copilot_shared::{CopilotError, Result, RetrievedChunk};

use crate::retrieval::Retriever;
use crate::stages::StageContext;

/// Tokens reported for every scripted reply.
pub(crate) const INPUT_TOKENS: u64 = 100;
pub(crate) const OUTPUT_TOKENS: u64 = 40;

#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: AtomicUsize,
    samplings: Mutex<Vec<Sampling>>,
    prompts: Mutex<Vec<String>>,
}

/// Backend provider that answers calls from a queue, in order, whatever the sampling.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackends {
    script: Arc<Script>,
}

impl ScriptedBackends {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, text: &str) -> Self {
        self.script.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub(crate) fn fail(self, message: &str) -> Self {
        self.script
            .replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn samplings(&self) -> Vec<Sampling> {
        self.script.samplings.lock().unwrap().clone()
    }

    /// User instructions received, in call order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.script.prompts.lock().unwrap().clone()
    }
}

struct ScriptedHandle {
    script: Arc<Script>,
}

#[async_trait]
impl GenerationBackend for ScriptedHandle {
    async fn invoke(&self, _system: &str, user: &str) -> Result<Generation> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        self.script.prompts.lock().unwrap().push(user.to_string());
        let next = self.script.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(Generation {
                text,
                input_tokens: INPUT_TOKENS,
                output_tokens: OUTPUT_TOKENS,
            }),
            Some(Err(message)) => Err(CopilotError::Backend(message)),
            None => Err(CopilotError::Backend("no scripted reply left".into())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

impl BackendProvider for ScriptedBackends {
    fn backend(&self, sampling: Sampling) -> Result<Arc<dyn GenerationBackend>> {
        self.script.samplings.lock().unwrap().push(sampling);
        Ok(Arc::new(ScriptedHandle {
            script: Arc::clone(&self.script),
        }))
    }
}

/// Retriever returning a fixed fragment list (or a fixed error).
#[derive(Default)]
pub(crate) struct FixedRetriever {
    chunks: Vec<RetrievedChunk>,
    error: Option<String>,
    calls: AtomicUsize,
    queries: Mutex<Vec<(String, usize)>>,
}

impl FixedRetriever {
    pub(crate) fn with(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push((query.to_string(), top_k));
        if let Some(message) = &self.error {
            return Err(CopilotError::Retrieval(message.clone()));
        }
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

pub(crate) fn cited(citation: &str, content: &str) -> RetrievedChunk {
    RetrievedChunk {
        content: content.into(),
        citation: Some(citation.into()),
    }
}

pub(crate) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).expect("valid date")
}

pub(crate) fn context<'a>(
    backends: &'a ScriptedBackends,
    retriever: &'a FixedRetriever,
) -> StageContext<'a> {
    StageContext {
        backends,
        retriever,
        top_k: 5,
        today: today(),
    }
}
