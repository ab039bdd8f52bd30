use super::params::{ParamValue, Params};
use super::{IndicatorType, InputSource, OutputShape, ParamDecl, RegistryEntry};

fn positive_period(v: &ParamValue) -> Result<(), String> {
    match v.as_usize() {
        Some(n) if n >= 2 => Ok(()),
        Some(n) => Err(format!("period must be >= 2, got {n}")),
        None => Err("period must be a non-negative integer".to_string()),
    }
}

fn positive_multiplier(v: &ParamValue) -> Result<(), String> {
    match v.as_f64() {
        Some(f) if f > 0.0 => Ok(()),
        Some(f) => Err(format!("multiplier must be > 0, got {f}")),
        None => Err("multiplier must be a number".to_string()),
    }
}

fn period(params: &Params) -> usize {
    params
        .get("period")
        .and_then(ParamValue::as_usize)
        .expect("validated by validate_params before this is called")
}

pub fn entries() -> Vec<RegistryEntry> {
    vec![
        RegistryEntry {
            indicator_type: IndicatorType::Sma,
            required_inputs: &[InputSource::Close],
            params: &[ParamDecl {
                name: "period",
                required: true,
                validate: positive_period,
            }],
            outputs: OutputShape::Single,
            sparse: false,
            warmup: period,
        },
        RegistryEntry {
            indicator_type: IndicatorType::Ema,
            required_inputs: &[InputSource::Close],
            params: &[ParamDecl {
                name: "period",
                required: true,
                validate: positive_period,
            }],
            outputs: OutputShape::Single,
            sparse: false,
            warmup: period,
        },
        RegistryEntry {
            indicator_type: IndicatorType::Rsi,
            required_inputs: &[InputSource::Close],
            params: &[ParamDecl {
                name: "period",
                required: true,
                validate: positive_period,
            }],
            outputs: OutputShape::Single,
            sparse: false,
            // Wilder's smoothing needs one extra bar to seed the first delta.
            warmup: |p| period(p) + 1,
        },
        RegistryEntry {
            indicator_type: IndicatorType::Atr,
            required_inputs: &[InputSource::High, InputSource::Low, InputSource::Close],
            params: &[ParamDecl {
                name: "period",
                required: true,
                validate: positive_period,
            }],
            outputs: OutputShape::Single,
            sparse: false,
            warmup: |p| period(p) + 1,
        },
        RegistryEntry {
            indicator_type: IndicatorType::BollingerBands,
            required_inputs: &[InputSource::Close],
            params: &[
                ParamDecl {
                    name: "period",
                    required: true,
                    validate: positive_period,
                },
                ParamDecl {
                    name: "std_mult",
                    required: true,
                    validate: positive_multiplier,
                },
            ],
            outputs: OutputShape::Multi(&["upper", "mid", "lower"]),
            sparse: false,
            warmup: period,
        },
        RegistryEntry {
            indicator_type: IndicatorType::Macd,
            required_inputs: &[InputSource::Close],
            params: &[
                ParamDecl {
                    name: "fast_period",
                    required: true,
                    validate: positive_period,
                },
                ParamDecl {
                    name: "slow_period",
                    required: true,
                    validate: positive_period,
                },
                ParamDecl {
                    name: "signal_period",
                    required: true,
                    validate: positive_period,
                },
            ],
            outputs: OutputShape::Multi(&["macd", "signal", "hist"]),
            sparse: false,
            warmup: |p| {
                let slow = p
                    .get("slow_period")
                    .and_then(ParamValue::as_usize)
                    .expect("validated");
                let signal = p
                    .get("signal_period")
                    .and_then(ParamValue::as_usize)
                    .expect("validated");
                slow + signal
            },
        },
        RegistryEntry {
            indicator_type: IndicatorType::Donchian,
            required_inputs: &[InputSource::High, InputSource::Low],
            params: &[ParamDecl {
                name: "period",
                required: true,
                validate: positive_period,
            }],
            outputs: OutputShape::Multi(&["upper", "mid", "lower"]),
            sparse: false,
            warmup: period,
        },
    ]
}
