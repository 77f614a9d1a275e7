pub mod analyzer;
pub mod config;
pub mod filters;
pub mod followup;
pub mod geo;
pub mod llm;
pub mod log;
pub mod message;
pub mod orchestrator;
pub mod researcher;
pub mod restaurant;
pub mod retriever;
pub mod reviewer;
pub mod reviews;
pub mod status;
pub mod store;
pub mod utils;
pub mod validator;
pub mod writer;

pub use config::Settings;
pub use followup::{Followup, FollowupResult, ResultSnapshot};
pub use geo::{Coordinates, Geocoder, Place};
pub use llm::{CanChat, CanEmbed, LlmProfile};
pub use message::{AgentMessage, Stage, Status};
pub use orchestrator::{Orchestrator, PipelineError, PipelineRequest, PipelineResult};
pub use restaurant::{CandidateSet, Restaurant};
pub use store::RestaurantStore;
