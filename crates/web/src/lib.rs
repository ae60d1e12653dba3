//! HTTP surface of the relay.
//!
//! Polling clients read latest-value slots out of the shared [`state::Relay`];
//! posted commands are stored there and then handed to the serial task over
//! its channel. `/video_feed` re-emits whatever the camera task last captured
//! as a multipart MJPEG stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use axum::{
    body::{Bytes, StreamBody},
    extract::Extension,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use log::*;
use tokio::sync::{mpsc, watch};

use state::SharedRelay;

pub const HANDSHAKE_RESPONSE: &str = "Handshake successful";
pub const BATTERY_PERCENTAGE: &str = "100";

const RELAY_FAILURE: &str = "command relay unavailable";

pub struct AppCtx {
    pub relay: SharedRelay,
    pub commands: mpsc::Sender<String>,
    pub frames: watch::Receiver<Vec<u8>>,
    /// Resolution/frame-rate text served at `/`, fixed at startup.
    pub banner: String,
}

pub fn router(ctx: AppCtx) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/receive_data", get(get_command).post(post_command))
        .route("/handshake", get(handshake))
        .route("/data", get(data))
        .route("/arduino_errors", get(arduino_errors))
        .route("/raspberry_pi_errors", get(raspberry_pi_errors))
        .route("/battery_percentage", get(battery_percentage))
        .route("/speed_control", get(get_speed).post(post_speed))
        .layer(Extension(Arc::new(ctx)))
}

pub async fn run_web(addr: SocketAddr, ctx: AppCtx) -> Result<()> {
    info!("listening on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(ctx).into_make_service())
        .await?;
    Ok(())
}

async fn index(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.banner.clone()
}

/// Multipart MJPEG stream. Ends silently once the camera task is gone.
async fn video_feed(Extension(ctx): Extension<Arc<AppCtx>>) -> impl IntoResponse {
    let mut frames = ctx.frames.clone();
    let stream = stream! {
        loop {
            if frames.changed().await.is_err() {
                return;
            }
            let frame = frames.borrow_and_update().clone();
            if frame.is_empty() {
                continue;
            }
            let mut part = Vec::with_capacity(frame.len() + 64);
            part.extend_from_slice(b"--frame\r\n");
            part.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            part.extend_from_slice(&frame);
            part.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, Infallible>(Bytes::from(part));
        }
    };
    (
        [
            (
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=frame",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        StreamBody::new(stream),
    )
}

async fn post_command(
    Extension(ctx): Extension<Arc<AppCtx>>,
    body: String,
) -> (StatusCode, &'static str) {
    ctx.relay.set_command(body.clone()).await;
    relay_to_link(&ctx, body).await
}

async fn get_command(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.relay.command().await
}

async fn post_speed(
    Extension(ctx): Extension<Arc<AppCtx>>,
    body: String,
) -> (StatusCode, &'static str) {
    ctx.relay.set_speed(body.clone()).await;
    relay_to_link(&ctx, body).await
}

async fn get_speed(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.relay.speed().await
}

/// The buffer is stored before this is called, so GET-after-POST holds even
/// when the serial task is gone.
async fn relay_to_link(ctx: &AppCtx, command: String) -> (StatusCode, &'static str) {
    if let Err(e) = ctx.commands.send(command).await {
        error!("command relay failed: {e}");
        ctx.relay
            .push_process_error(format!("command relay failed: {e}"))
            .await;
        return (StatusCode::INTERNAL_SERVER_ERROR, RELAY_FAILURE);
    }
    (StatusCode::OK, "ok")
}

async fn handshake() -> &'static str {
    HANDSHAKE_RESPONSE
}

async fn data(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.relay.reading().await
}

async fn arduino_errors(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.relay.device_errors().await
}

async fn raspberry_pi_errors(Extension(ctx): Extension<Arc<AppCtx>>) -> String {
    ctx.relay.process_errors().await
}

async fn battery_percentage() -> &'static str {
    BATTERY_PERCENTAGE
}
