mod handlers;
mod routes;
mod state;

pub use handlers::{RecommendRequest, ResultResponse, SubmitResponse};
pub use routes::create_router;
pub use state::AppState;
