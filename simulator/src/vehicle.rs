use crate::telemetry::TelemetrySample;
use chrono::{DateTime, Utc};
use rand::Rng;

const TANK_LITERS: f64 = 200.0;
const REFUEL_BELOW_PERCENT: f64 = 3.0;

/// One simulated vehicle with a draining tank
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub device_id: i64,
    lat: f64,
    lng: f64,
    heading: f64,
    fuel_level: f64,
    /// Liters per minute at cruising speed
    burn_rate: f64,
}

impl Vehicle {
    pub fn new(rng: &mut impl Rng, device_id: i64, heavy_share: f64) -> Self {
        let burn_rate = if rng.gen_bool(heavy_share) {
            rng.gen_range(2.0..5.0) // Heavy haulers drain within the hour
        } else {
            rng.gen_range(0.05..0.4)
        };
        Self {
            device_id,
            lat: rng.gen_range(4.5..4.8),
            lng: rng.gen_range(-74.2..-74.0),
            heading: rng.gen_range(0.0..std::f64::consts::TAU),
            fuel_level: rng.gen_range(40.0..100.0),
            burn_rate,
        }
    }

    /// Advances the vehicle by `minutes` of simulated time
    pub fn step(&mut self, rng: &mut impl Rng, minutes: f64, now: DateTime<Utc>) -> TelemetrySample {
        let speed = if rng.gen_bool(0.1) {
            0.0 // Idle at a light
        } else {
            rng.gen_range(30.0..90.0)
        };

        let km = speed * minutes / 60.0;
        self.heading += rng.gen_range(-0.3..0.3);
        self.lat = (self.lat + self.heading.cos() * km / 111.0).clamp(-90.0, 90.0);
        self.lng = (self.lng + self.heading.sin() * km / 111.0).clamp(-180.0, 180.0);

        let load = if speed == 0.0 { 0.2 } else { speed / 60.0 };
        let burned_liters = self.burn_rate * load * minutes;
        self.fuel_level -= burned_liters / TANK_LITERS * 100.0;

        // Occasional sensor jitter upward, which the analyzer must ignore
        if rng.gen_bool(0.03) {
            self.fuel_level += rng.gen_range(0.1..0.8);
        }

        if self.fuel_level < REFUEL_BELOW_PERCENT {
            self.fuel_level = rng.gen_range(90.0..100.0);
        }
        self.fuel_level = self.fuel_level.clamp(0.0, 100.0);

        TelemetrySample {
            device_id: self.device_id,
            timestamp: now,
            lat: self.lat,
            lng: self.lng,
            speed,
            fuel_level: self.fuel_level,
            temperature: rng.gen_range(70.0..105.0),
        }
    }
}
