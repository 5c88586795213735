mod message_ops;
mod operator_ops;
mod session_ops;
mod thread_ops;
mod trigger_ops;

pub use message_ops::{PostMessageInput, ReadMessagesResult};
pub use operator_ops::{FallbackSelector, OperatorOps};
pub use session_ops::HeartbeatInput;
pub use thread_ops::CreateThreadInput;
pub use trigger_ops::{TriggerDecisionOutcome, TriggerParticipantInput};
