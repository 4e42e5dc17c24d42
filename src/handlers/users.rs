use axum::{extract::State, Json};
use opentelemetry::trace::Status;
use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::destructure;
use crate::error::AppError;
use crate::observability::{sync_in_span, Severity};

const FIRST_NAMES: &[&str] = &["Ada", "Grace", "Alan", "Edsger", "Barbara", "Dennis", "Ken", "Frances"];
const LAST_NAMES: &[&str] = &["Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Ritchie", "Thompson", "Allen"];

/// Generated user; only the id reaches the logs in clear text
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub ssn: String,
}

destructure!(User {
    id,
    #[not_logged]
    first_name,
    #[not_logged]
    last_name,
    #[not_logged]
    age,
    #[log_masked(preserve_length)]
    ssn,
});

impl User {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id: Uuid::new_v4(),
            first_name: FIRST_NAMES.choose(&mut rng).unwrap_or(&"Ada").to_string(),
            last_name: LAST_NAMES.choose(&mut rng).unwrap_or(&"Lovelace").to_string(),
            age: rng.gen_range(18..=30),
            ssn: format!(
                "{:03}-{:02}-{:04}",
                rng.gen_range(100..=899),
                rng.gen_range(1..=99),
                rng.gen_range(1..=9999)
            ),
        }
    }
}

/// Handle /users endpoint
///
/// Generates five users, each inside its own child span. Even-numbered
/// spans end `Ok`, odd-numbered ones `Error`.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    let mut users = Vec::with_capacity(5);

    for index in 1..=5 {
        let user = User::generate();
        let log_creation = || {
            state
                .pipeline
                .event(Severity::Information, "Creating {@User}")
                .payload(&user)
                .emit()
        };

        match state.tracer.start_child("Generating new user") {
            Some(span) => {
                let result = sync_in_span(span.clone(), log_creation);
                let status = if index % 2 == 0 {
                    Status::Ok
                } else {
                    Status::error("odd user index")
                };
                span.end(status);
                result?;
            }
            None => log_creation()?,
        }

        users.push(user);
    }

    Ok(Json(users))
}
