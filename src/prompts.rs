use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const SMALL_PROMPTS: &[&str] = &[
    "Hello, world!",
    "What is 2+2?",
    "Tell me a joke.",
    "How are you?",
    "What's the weather like?",
];

const MEDIUM_PROMPTS: &[&str] = &[
    "Write a short story about a robot learning to paint.",
    "Explain the concept of recursion in programming with an example.",
    "What are the main differences between renewable and non-renewable energy sources?",
    "Describe the process of photosynthesis in plants.",
    "How does machine learning differ from traditional programming approaches?",
];

const LARGE_PROMPTS: &[&str] = &[
    "You are a senior software engineer reviewing a pull request. The code implements a \
     distributed cache system using Redis. Please provide a comprehensive code review covering \
     architecture, performance, security, error handling, testing, and maintainability. Consider \
     scalability concerns and suggest improvements for monitoring and observability. The system \
     needs to handle 100,000 requests per second with sub-millisecond latency requirements.",
    "Write a detailed technical specification for a real-time collaborative document editing \
     system similar to Google Docs. Include the architecture design, data structures, conflict \
     resolution algorithms, network protocols, security considerations, user authentication, \
     permission management, and scalability strategies. Explain how you would handle concurrent \
     edits, maintain consistency across multiple clients, and ensure data persistence.",
    "Design a comprehensive monitoring and alerting system for a microservices architecture \
     running on Kubernetes. The system should handle metrics collection, log aggregation, \
     distributed tracing, anomaly detection, and automated incident response. Explain the \
     technology stack, data flow, storage requirements, query optimization, dashboard design, \
     and integration with existing DevOps tools.",
];

/// Which built-in prompt set the workers rotate through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PromptSize {
    Small,
    #[default]
    Medium,
    Large,
    All,
}

impl fmt::Display for PromptSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromptSize::Small => "small",
            PromptSize::Medium => "medium",
            PromptSize::Large => "large",
            PromptSize::All => "all",
        };
        f.write_str(name)
    }
}

/// An immutable, non-empty list of prompts shared by all workers.
#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: Arc<[String]>,
}

impl PromptSet {
    /// Builds a prompt set from arbitrary text. Returns `None` when empty.
    pub fn new<I, S>(prompts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prompts: Vec<String> = prompts.into_iter().map(Into::into).collect();
        if prompts.is_empty() {
            return None;
        }
        Some(Self {
            prompts: prompts.into(),
        })
    }

    pub fn for_size(size: PromptSize) -> Self {
        let prompts: Vec<String> = match size {
            PromptSize::Small => SMALL_PROMPTS.iter().map(|p| p.to_string()).collect(),
            PromptSize::Medium => MEDIUM_PROMPTS.iter().map(|p| p.to_string()).collect(),
            PromptSize::Large => LARGE_PROMPTS.iter().map(|p| p.to_string()).collect(),
            PromptSize::All => SMALL_PROMPTS
                .iter()
                .chain(MEDIUM_PROMPTS)
                .chain(LARGE_PROMPTS)
                .map(|p| p.to_string())
                .collect(),
        };
        Self {
            prompts: prompts.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// A fresh rotation starting at the first prompt.
    pub fn rotation(&self) -> PromptRotation {
        PromptRotation {
            prompts: Arc::clone(&self.prompts),
            next: 0,
        }
    }
}

/// Deterministic round-robin cursor over a [`PromptSet`].
#[derive(Debug)]
pub struct PromptRotation {
    prompts: Arc<[String]>,
    next: usize,
}

impl PromptRotation {
    pub fn next_prompt(&mut self) -> &str {
        let index = self.next % self.prompts.len();
        self.next = (index + 1) % self.prompts.len();
        &self.prompts[index]
    }
}
