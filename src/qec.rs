/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The `qec.decode` / `qec.benchmark` RPC handlers (§4.5). Both are
//! deterministic stubs, not a real error-correction decoder — real decoder
//! correctness is an explicit non-goal (§1).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{SgError, E_MEASUREMENTS_MUST_BE_ARRAY};

/// Per-qubit majority vote over the provided measurement rounds. Ties
/// (equal zeros and ones) resolve to `0`.
pub fn decode(params: &Value) -> Result<Value, SgError> {
    let code = params.get("code").and_then(Value::as_str).unwrap_or("repetition");
    let measurements = params
        .get("measurements")
        .ok_or_else(|| SgError::control(E_MEASUREMENTS_MUST_BE_ARRAY))?;
    let measurements = measurements
        .as_array()
        .ok_or_else(|| SgError::control(E_MEASUREMENTS_MUST_BE_ARRAY))?;

    if measurements.is_empty() {
        return Ok(json!({
            "job_id": Uuid::new_v4().to_string(),
            "status": "done",
            "corrections": [],
            "statistics": { "qubits": 0, "measurements": 0, "code": code },
        }));
    }

    let num_qubits = measurements
        .iter()
        .filter_map(Value::as_array)
        .map(|round| round.len())
        .max()
        .unwrap_or(0);

    let mut corrections = Vec::with_capacity(num_qubits);
    for qubit in 0..num_qubits {
        let mut ones = 0i64;
        let mut zeros = 0i64;
        for round in measurements.iter().filter_map(Value::as_array) {
            match round.get(qubit).and_then(Value::as_i64) {
                Some(1) => ones += 1,
                Some(_) => zeros += 1,
                None => {}
            }
        }
        corrections.push(if ones > zeros { 1 } else { 0 });
    }

    Ok(json!({
        "job_id": Uuid::new_v4().to_string(),
        "status": "done",
        "corrections": corrections,
        "statistics": { "qubits": num_qubits, "measurements": measurements.len(), "code": code },
    }))
}

const SURFACE_CODE_AMPLITUDE: f64 = 0.1;
const SURFACE_CODE_THRESHOLD: f64 = 0.01;

/// Monte-Carlo / heuristic logical-error-rate estimate. `repetition` runs
/// an actual majority-vote simulation; `surface` uses the closed-form
/// threshold heuristic `A*(p/p_th)^((d+1)/2)`; `custom` just echoes `p_flip`.
pub fn benchmark(params: &Value) -> Value {
    let code = params.get("code").and_then(Value::as_str).unwrap_or("repetition");
    let p_flip = params.get("p_flip").and_then(Value::as_f64).unwrap_or(0.05);
    let rounds = params.get("rounds").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
    let shots = params.get("shots").and_then(Value::as_u64).unwrap_or(100).max(1) as usize;
    let seed = params.get("seed").and_then(Value::as_u64).unwrap_or(0);

    let statistics = match code {
        "surface" => {
            let distance = params
                .get("params")
                .and_then(|p| p.get("distance"))
                .and_then(Value::as_u64)
                .unwrap_or(3)
                .max(3);
            let distance = distance | 1; // odd distance
            let exponent = (distance as f64 + 1.0) / 2.0;
            let logical_error_rate =
                SURFACE_CODE_AMPLITUDE * (p_flip / SURFACE_CODE_THRESHOLD).powf(exponent);
            json!({
                "code": "surface",
                "distance": distance,
                "p_flip": p_flip,
                "logical_error_rate": logical_error_rate,
            })
        }
        "custom" => json!({ "code": "custom", "p_flip": p_flip }),
        _ => {
            let mut rng = if seed == 0 {
                StdRng::from_entropy()
            } else {
                StdRng::seed_from_u64(seed)
            };
            let mut logical_failures = 0usize;
            for _ in 0..shots {
                let mut ones = 0usize;
                for _ in 0..rounds {
                    if rng.gen_bool(p_flip.clamp(0.0, 1.0)) {
                        ones += 1;
                    }
                }
                if ones * 2 > rounds {
                    logical_failures += 1;
                }
            }
            let logical_error_rate = logical_failures as f64 / shots as f64;
            json!({
                "code": "repetition",
                "p_flip": p_flip,
                "rounds": rounds,
                "shots": shots,
                "logical_error_rate": logical_error_rate,
            })
        }
    };

    json!({
        "job_id": Uuid::new_v4().to_string(),
        "status": "done",
        "statistics": statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_empty_measurements_returns_zero_stats() {
        let result = decode(&json!({ "code": "repetition", "measurements": [] })).unwrap();
        assert_eq!(result["corrections"], json!([]));
        assert_eq!(result["statistics"]["qubits"], 0);
        assert_eq!(result["statistics"]["measurements"], 0);
    }

    #[test]
    fn decode_majority_vote_ties_resolve_to_zero() {
        let result = decode(&json!({
            "measurements": [[1, 0], [0, 1]]
        }))
        .unwrap();
        assert_eq!(result["corrections"], json!([0, 0]));
    }

    #[test]
    fn decode_majority_vote_picks_majority() {
        let result = decode(&json!({
            "measurements": [[1], [1], [0]]
        }))
        .unwrap();
        assert_eq!(result["corrections"], json!([1]));
    }

    #[test]
    fn decode_requires_measurements_array() {
        let err = decode(&json!({ "measurements": "nope" })).unwrap_err();
        assert_eq!(err.details["slug"], "D2400_MEASUREMENTS_MUST_BE_ARRAY");
    }

    #[test]
    fn benchmark_custom_echoes_p_flip() {
        let result = benchmark(&json!({ "code": "custom", "p_flip": 0.3 }));
        assert_eq!(result["statistics"]["p_flip"], 0.3);
    }

    #[test]
    fn benchmark_surface_uses_odd_distance() {
        let result = benchmark(&json!({ "code": "surface", "p_flip": 0.01, "params": {"distance": 4} }));
        assert_eq!(result["statistics"]["distance"], 5);
    }
}
