//! HTTP target for exercising barrage: fixed and jittered delays, injected errors and
//! rate-limited endpoints.
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::counter;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tower_http::trace::TraceLayer;
#[allow(unused)]
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct AppState {
    limiters: Arc<RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>>,
    hits: Arc<AtomicU64>,
}

impl AppState {
    fn hit(&self) {
        counter!("mock_service_requests_total").increment(1);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// The limiter for `key`, created at `tps` on first use.
    fn limiter(&self, key: &str, tps: u32) -> Arc<DefaultDirectRateLimiter> {
        let existing = self
            .limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if let Some(limiter) = existing {
            return limiter;
        }

        self.limiters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("New limiter {key} at {tps} TPS");
                Arc::new(rate_limiter(tps))
            })
            .clone()
    }

    /// Requests served since the last call.
    pub fn take_hits(&self) -> u64 {
        self.hits.swap(0, Ordering::Relaxed)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/normal/ms/:mean_ms/:std_dev_ms", get(normal))
        .route("/error/:percent/delay/ms/:delay_ms", get(error))
        .route("/status/:code", get(status))
        .route(
            "/max/:max_tps/delay/ms/:delay_ms/scenario/:scenario_name",
            get(max),
        )
        .route(
            "/limited/:max_tps/delay/ms/:delay_ms/server/:server_id",
            get(limited),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState::default();
    tokio::spawn(tps_measure_task(state.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[debug_handler]
async fn delay(State(state): State<AppState>, Path(delay_ms): Path<u64>) {
    state.hit();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
async fn normal(
    State(state): State<AppState>,
    Path((mean_ms, std_dev_ms)): Path<(f64, f64)>,
) -> Result<(), StatusCode> {
    state.hit();
    let dist = Normal::new(mean_ms, std_dev_ms).map_err(|_| StatusCode::BAD_REQUEST)?;
    let sampled = dist.sample(&mut rand::thread_rng()).max(0.);
    tokio::time::sleep(Duration::from_secs_f64(sampled / 1000.)).await;
    Ok(())
}

/// Fails `percent` percent of requests with a 500.
#[debug_handler]
async fn error(
    State(state): State<AppState>,
    Path((percent, delay_ms)): Path<(f64, u64)>,
) -> StatusCode {
    state.hit();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    if rand::thread_rng().gen_bool((percent / 100.).clamp(0., 1.)) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

#[debug_handler]
async fn status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    state.hit();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Over-limit requests are rejected with a 503.
#[debug_handler]
async fn max(
    State(state): State<AppState>,
    Path((max_tps, delay_ms, scenario_name)): Path<(u32, u64, String)>,
) -> StatusCode {
    state.hit();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    match state.limiter(&scenario_name, max_tps).check() {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Over-limit requests queue until the limiter admits them.
#[debug_handler]
async fn limited(
    State(state): State<AppState>,
    Path((max_tps, delay_ms, server_id)): Path<(u32, u64, String)>,
) {
    state.hit();
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    state.limiter(&server_id, max_tps).until_ready().await;
}

pub fn rate_limiter(tps: u32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(
        NonZeroU32::new(tps).unwrap_or(NonZeroU32::MIN),
    ))
}

async fn tps_measure_task(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        let transactions = state.take_hits();
        if transactions > 0 {
            debug!("{transactions} TPS");
        }
    }
}
