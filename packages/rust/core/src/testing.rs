//! In-crate fakes for the model and fetcher seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use chronicler_fetcher::Fetcher;
use chronicler_llm::{LanguageModel, ModelReply, ModelRequest, TaskKind};
use chronicler_shared::{ChroniclerError, Result};

use crate::prompts::{EXISTING_CLOSE, EXISTING_OPEN, NEW_CLOSE, NEW_OPEN};

type Responder = Box<dyn Fn(&ModelRequest) -> Result<String> + Send + Sync>;

/// Model that answers from per-task scripts.
///
/// Queued replies are used first, in order; once a task's queue is empty its
/// responder (if any) answers. Anything else is a permanent model error.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    queued: Mutex<HashMap<TaskKind, VecDeque<Result<String>>>>,
    responders: HashMap<TaskKind, Responder>,
    calls: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply for `task`.
    pub fn reply(self, task: TaskKind, text: impl Into<String>) -> Self {
        self.push(task, Ok(text.into()))
    }

    /// Queue one failure for `task`.
    pub fn fail(self, task: TaskKind, error: ChroniclerError) -> Self {
        self.push(task, Err(error))
    }

    /// Answer `task` with `respond` once its queue is drained.
    pub fn respond(
        mut self,
        task: TaskKind,
        respond: impl Fn(&ModelRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.responders.insert(task, Box::new(respond));
        self
    }

    /// Answer `task` with the same text forever.
    pub fn always(self, task: TaskKind, text: impl Into<String>) -> Self {
        let text = text.into();
        self.respond(task, move |_| Ok(text.clone()))
    }

    fn push(self, task: TaskKind, reply: Result<String>) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self, task: TaskKind) -> usize {
        self.requests(task).len()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self, task: TaskKind) -> Vec<ModelRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply> {
        self.calls.lock().unwrap().push(request.clone());

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);
        let text = match queued {
            Some(reply) => reply?,
            None => match self.responders.get(&request.task) {
                Some(respond) => respond(request)?,
                None => {
                    return Err(ChroniclerError::Model(format!(
                        "no scripted reply for {}",
                        request.task
                    )));
                }
            },
        };
        Ok(ModelReply::new(text))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

fn section<'a>(prompt: &'a str, open: &str, close: &str) -> &'a str {
    let Some(start) = prompt.find(open) else {
        return "";
    };
    let rest = &prompt[start + open.len()..];
    let end = rest.find(close).unwrap_or(rest.len());
    rest[..end].trim()
}

/// Merge responder that keeps both sections, dropping exact duplicates.
pub(crate) fn union_merge(request: &ModelRequest) -> Result<String> {
    let existing = section(&request.prompt, EXISTING_OPEN, EXISTING_CLOSE);
    let new = section(&request.prompt, NEW_OPEN, NEW_CLOSE);

    let mut lines: Vec<&str> = Vec::new();
    for line in existing.lines().chain(new.lines()) {
        let line = line.trim();
        if line.is_empty() || line == "(nothing yet)" || lines.contains(&line) {
            continue;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// Merge responder that forgets everything it already knew.
pub(crate) fn lossy_merge(request: &ModelRequest) -> Result<String> {
    Ok(section(&request.prompt, NEW_OPEN, NEW_CLOSE).to_string())
}

/// Fetcher serving fixed pages by exact URL.
#[derive(Default)]
pub(crate) struct MapFetcher {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<Url>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<Url> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &Url) -> Option<String> {
        self.fetched.lock().unwrap().push(url.clone());
        self.pages.get(url.as_str()).cloned()
    }
}
