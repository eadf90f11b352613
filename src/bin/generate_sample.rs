//! Writes a synthetic two-day sensor log (1 min cadence) for trying out the
//! `airlog` commands: morning and evening occupancy drive CO2, an evening
//! cooking burst drives particles, and one half-hour outage leaves a gap.

/// 2024-01-01T00:00:00Z
const START_EPOCH: i64 = 1_704_067_200;
const MINUTES: i64 = 2 * 24 * 60;
const OUTAGE: std::ops::Range<i64> = 1500..1530;

const HEADER: [&str; 17] = [
    "Timestamp", "FLAGS", "CO2", "PM1.0", "PM2.5", "PM4.0", "PM10", "PN0.5", "PN1.0", "PN2.5", "PN4.0",
    "PN10.0", "TempC", "RH", "VOC", "NOX", "PRESSURE",
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Room model advanced one minute at a time.
struct Room {
    co2_excess: f64,
    pm_excess: f64,
}

impl Room {
    const OUTDOOR_CO2: f64 = 430.0;
    const BACKGROUND_PM: f64 = 4.0;
    /// Air changes per hour with windows closed.
    const ACH: f64 = 1.2;
    /// Particle loss rate (ventilation plus deposition), per hour.
    const PM_LOSS: f64 = 2.0;

    fn step(&mut self, minute_of_day: i64) {
        let occupied = (480..600).contains(&minute_of_day) || (1080..1260).contains(&minute_of_day);
        let cooking = (1110..1125).contains(&minute_of_day);
        if occupied {
            self.co2_excess += 8.0;
        }
        if cooking {
            self.pm_excess += 12.0;
        }
        self.co2_excess *= (-Self::ACH / 60.0).exp();
        self.pm_excess *= (-Self::PM_LOSS / 60.0).exp();
    }
}

fn main() {
    let output_path = std::env::args().nth(1).unwrap_or_else(|| "sample_air.csv".to_string());
    let mut rng = SimpleRng::new(42);
    let mut room = Room {
        co2_excess: 0.0,
        pm_excess: 0.0,
    };

    let mut writer = csv::Writer::from_path(&output_path).expect("Failed to create output file");
    writer.write_record(HEADER).expect("Failed to write header");

    let mut rows = 0;
    for minute in 0..MINUTES {
        room.step(minute % 1440);
        if OUTAGE.contains(&minute) {
            continue;
        }

        let co2 = Room::OUTDOOR_CO2 + room.co2_excess + rng.gauss(0.0, 5.0);
        let pm25 = (Room::BACKGROUND_PM + room.pm_excess + rng.gauss(0.0, 0.4)).max(0.0);
        let hour = (minute % 1440) as f64 / 60.0;
        let temp = 21.0 + 1.5 * (2.0 * std::f64::consts::PI * (hour - 9.0) / 24.0).sin() + rng.gauss(0.0, 0.05);
        // index channels read 0 until the sensor has warmed up
        let (voc, nox) = if minute < 5 {
            (0.0, 0.0)
        } else {
            (100.0 + room.co2_excess / 10.0 + rng.gauss(0.0, 2.0), 1.0)
        };

        let record = [
            (START_EPOCH + minute * 60).to_string(),
            "0".to_string(),
            format!("{co2:.0}"),
            format!("{:.1}", 0.6 * pm25),
            format!("{pm25:.1}"),
            format!("{:.1}", 1.1 * pm25),
            format!("{:.1}", 1.3 * pm25),
            format!("{:.1}", 8.0 * pm25),
            format!("{:.1}", 9.5 * pm25),
            format!("{:.1}", 9.9 * pm25),
            format!("{:.1}", 10.0 * pm25),
            format!("{:.1}", 10.1 * pm25),
            format!("{temp:.2}"),
            format!("{:.1}", 45.0 + room.co2_excess / 40.0 + rng.gauss(0.0, 0.5)),
            format!("{voc:.0}"),
            format!("{nox:.0}"),
            format!("{:.1}", 1013.0 + rng.gauss(0.0, 0.3)),
        ];
        writer.write_record(&record).expect("Failed to write row");
        rows += 1;
    }
    writer.flush().expect("Failed to flush output");

    println!("Wrote {rows} rows ({} min outage) to {output_path}", OUTAGE.end - OUTAGE.start);
}
