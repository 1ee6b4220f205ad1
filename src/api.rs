//! JSON completion API served alongside the bot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::completion::{ChatCompletion, Client, Message, SamplingParams};
use crate::persona::Persona;

pub struct ApiState {
    pub completion: Arc<Client>,
    pub persona: Arc<Persona>,
}

#[derive(Deserialize)]
struct GenerateRequest {
    message: Option<String>,
}

#[derive(Serialize)]
struct ResponseEnvelope {
    response: String,
    status: &'static str,
    timestamp: String,
}

impl ResponseEnvelope {
    fn new(response: String, status: &'static str) -> Self {
        Self {
            response,
            status,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct GreetingEnvelope {
    greeting: String,
    status: &'static str,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/generate-response", post(generate_response))
        .route("/get-greeting", get(get_greeting))
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("JSON API listening on {addr}");
    axum::serve(listener, router(state)).await
}

async fn generate_response(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<GenerateRequest>,
) -> impl IntoResponse {
    let Some(message) = request.message.filter(|m| !m.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ResponseEnvelope::new(
                "*click* *click* No message provided".into(),
                "error",
            )),
        );
    };

    info!("API message: {message}");

    let messages = [Message::user(message)];
    let params = SamplingParams::new(250, 0.9).with_penalties(0.7, 0.5);

    match state
        .completion
        .complete(&state.persona.system_prompt, &messages, params)
        .await
    {
        Ok(reply) => (
            StatusCode::OK,
            Json(ResponseEnvelope::new(state.persona.post_process(&reply), "success")),
        ),
        Err(e) => {
            warn!("API completion failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ResponseEnvelope::new(state.persona.apology.clone(), "error")),
            )
        }
    }
}

async fn get_greeting(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let messages = [Message::user("Generate a friendly whale-themed greeting")];

    match state
        .completion
        .complete(&state.persona.system_prompt, &messages, SamplingParams::new(50, 0.9))
        .await
    {
        Ok(greeting) => Json(GreetingEnvelope {
            greeting: state.persona.post_process(&greeting),
            status: "success",
        }),
        Err(e) => {
            warn!("Greeting generation failed: {e}");
            Json(GreetingEnvelope {
                greeting: state.persona.fallback_greeting().to_string(),
                status: "error",
            })
        }
    }
}
