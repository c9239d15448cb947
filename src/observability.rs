use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("coachline.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("coachline.client.request_errors");
pub(crate) static CLIENT_REQUEST_RETRIES: Counter = Counter::new("coachline.client.retries");
pub(crate) static CLIENT_RATE_LIMITED: Counter = Counter::new("coachline.client.rate_limited");
pub(crate) static CLIENT_COOLDOWN_REJECTS: Counter =
    Counter::new("coachline.client.cooldown_rejects");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("coachline.client.request_duration_seconds");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("coachline.stream.frames");
pub(crate) static STREAM_CHUNKS: Counter = Counter::new("coachline.stream.chunks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("coachline.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("coachline.stream.bytes");
pub(crate) static STREAM_STOPPED: Counter = Counter::new("coachline.stream.stopped");
pub(crate) static STREAM_DURATION: Moments = Moments::new("coachline.stream.duration_seconds");

pub(crate) static REVEAL_TICKS: Counter = Counter::new("coachline.reveal.ticks");

pub(crate) static STORE_WRITES: Counter = Counter::new("coachline.store.writes");
pub(crate) static STORE_WRITE_ERRORS: Counter = Counter::new("coachline.store.write_errors");
pub(crate) static STORE_HEALED: Counter = Counter::new("coachline.store.healed_entries");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_RETRIES);
    collector.register_counter(&CLIENT_RATE_LIMITED);
    collector.register_counter(&CLIENT_COOLDOWN_REJECTS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_STOPPED);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&REVEAL_TICKS);

    collector.register_counter(&STORE_WRITES);
    collector.register_counter(&STORE_WRITE_ERRORS);
    collector.register_counter(&STORE_HEALED);
}
