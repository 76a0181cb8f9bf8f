use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/session",
            post(handlers::sign_in).delete(handlers::sign_out),
        )
        .route("/api/session/active-day", put(handlers::set_active_day))
        .route("/api/today", get(handlers::get_today))
        .route("/api/days/:day_key", get(handlers::get_day))
        .route("/api/days/:day_key/entry", put(handlers::put_entry))
        .route("/api/days/:day_key/thanks", post(handlers::post_thanks))
        .route("/api/days/:day_key/refold", post(handlers::post_refold))
        .route("/api/history", get(handlers::get_history))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/changes", get(handlers::get_changes))
        .route(
            "/api/agreements",
            get(handlers::list_agreements).post(handlers::create_agreement),
        )
        .route("/api/agreements/reorder", post(handlers::reorder_agreements))
        .route("/api/agreements/:id", put(handlers::update_agreement))
        .route("/api/agreements/:id/pin", post(handlers::pin_agreement))
        .route("/api/agreements/:id/archive", post(handlers::archive_agreement))
        .route(
            "/api/weekly-comments",
            get(handlers::list_weekly_comments).post(handlers::store_weekly_comment),
        )
        .route(
            "/api/weekly/:week_key/summary-input",
            get(handlers::get_weekly_summary_input),
        )
        .with_state(state)
}
