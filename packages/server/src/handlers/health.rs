/// Readiness probe.
pub async fn readyz() -> &'static str {
    "ok"
}
