//! `denidin-agent` — the conversational core: history assembly, the LLM
//! and transport interfaces, session summarisation, and the inbound message
//! pipeline that ties them together.

pub mod constitution;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod provider;
pub mod summariser;
pub mod transport;

pub use constitution::ConstitutionCache;
pub use error::{PipelineError, Result};
pub use history::{HistoryAssembler, LlmInput};
pub use pipeline::{FixedReplies, MessagePipeline};
pub use provider::{Completer, Completion, FailingCompleter, MockCompleter, ProviderError, Turn};
pub use summariser::{SummaryOutcome, Summariser};
pub use transport::{IncomingMessage, MessageKind, MessagingTransport, TransportError};
