use tracing::trace;

/// Counts one platform round trip. Emitted at trace level only; nothing scrapes it.
pub fn request_sent(endpoint: &'static str, status: u16) {
    let outcome = match status {
        200..=299 => "ok",
        300..=399 => "redirect",
        _ => "error",
    };
    trace!(
        target = "bolha.metrics",
        endpoint,
        status,
        outcome,
        "platform_request"
    );
}
