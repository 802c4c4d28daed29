use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Hub counters, exported at `/metrics`.
#[derive(Clone, Default)]
pub struct Metrics {
    pub matches_created: Counter,
    pub matches_finished: Counter,
    pub matches_abandoned: Counter,
    pub live_matches: Gauge,
    pub rolls: Counter,
    pub moves: Counter,
    pub rejections: Counter,
}

impl Metrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "matches_created",
            "Number of matches created",
            self.matches_created.clone(),
        );
        registry.register(
            "matches_finished",
            "Number of matches won by bearing off",
            self.matches_finished.clone(),
        );
        registry.register(
            "matches_abandoned",
            "Number of matches abandoned or aborted",
            self.matches_abandoned.clone(),
        );
        registry.register(
            "live_matches",
            "Number of matches currently in memory",
            self.live_matches.clone(),
        );
        registry.register("rolls", "Number of dice rolls served", self.rolls.clone());
        registry.register("moves", "Number of moves applied", self.moves.clone());
        registry.register(
            "rejections",
            "Number of rejected requests",
            self.rejections.clone(),
        );
    }
}
