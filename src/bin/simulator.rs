use clap::{App, Arg};
use colored::*;
use keynet::config::{ControllerConfig, Variant, HEARTBEAT_PERIOD_MS, SAMPLE_PERIOD_MS};
use keynet::hal::{is_keypad_char, StatusIndicator};
use keynet::lock::LockState;
use keynet::sim::{NackInjectionConfig, Network};
use keynet::RetryPolicy;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{error, info, warn, Level};

// 1.0 V at the sensor, about 30.6 C
const DEFAULT_ADC_CODE: &str = "1241";
const DEFAULT_AMBIENT_DECI_C: &str = "220";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("keynet-sim")
        .version("0.1.0")
        .author("Embedded Controls Team")
        .about("Keypad-secured control network simulator")
        .arg(
            Arg::with_name("variant")
                .short("m")
                .long("variant")
                .value_name("VARIANT")
                .help("Controller variant")
                .takes_value(true)
                .possible_values(&["lockbox", "thermostat"])
                .default_value("lockbox"),
        )
        .arg(
            Arg::with_name("passkey")
                .short("k")
                .long("passkey")
                .value_name("KEYS")
                .help("Four keypad characters")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("window")
                .short("w")
                .long("window")
                .value_name("N")
                .help("Sample window size (1-9)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("retry-cap")
                .long("retry-cap")
                .value_name("N")
                .help("Give up on a transfer after N NACK retries (default: retry forever)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("nack-rate")
                .long("nack-rate")
                .value_name("PERCENT")
                .help("Inject NACKs on this share of bus phases")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("adc")
                .long("adc")
                .value_name("CODE")
                .help("Raw ADC code returned by each conversion")
                .takes_value(true)
                .default_value(DEFAULT_ADC_CODE),
        )
        .arg(
            Arg::with_name("ambient")
                .long("ambient")
                .value_name("DECI_C")
                .help("LM92 ambient temperature in tenths of a degree")
                .takes_value(true)
                .default_value(DEFAULT_AMBIENT_DECI_C),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print JSON snapshots instead of the console view"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let variant = match matches.value_of("variant") {
        Some("thermostat") => Variant::Thermostat,
        _ => Variant::LockBox,
    };

    let mut config = ControllerConfig::new(variant);
    if let Some(passkey) = matches.value_of("passkey") {
        config = config.with_passkey(passkey)?;
    }
    if let Some(window) = matches.value_of("window") {
        config = config.with_window_size(window.parse()?)?;
    }
    if let Some(cap) = matches.value_of("retry-cap") {
        config = config.with_retry_policy(RetryPolicy::Capped(cap.parse()?));
    }

    let injection = match matches.value_of("nack-rate") {
        Some(rate) => NackInjectionConfig {
            enabled: true,
            rate_percent: rate.parse::<u8>()?.min(100),
            dead_address: None,
        },
        None => NackInjectionConfig::default(),
    };

    let adc_code: u16 = matches.value_of("adc").unwrap_or(DEFAULT_ADC_CODE).parse()?;
    let ambient: i32 = matches
        .value_of("ambient")
        .unwrap_or(DEFAULT_AMBIENT_DECI_C)
        .parse()?;
    let json = matches.is_present("json");

    let mut net = Network::new_with_injection(config, injection)?;
    net.wire.lm92.set_deci_celsius(ambient);

    if !json {
        println!("{}", "Keynet network simulator".bold());
        println!("{}", "========================".bold());
        println!("Type keypad characters (0-9 A-D * #) and press enter. Ctrl+C quits.");
    }
    info!(?variant, adc_code, "simulation running");

    let mut heartbeat = time::interval(Duration::from_millis(HEARTBEAT_PERIOD_MS));
    let mut sample = time::interval(Duration::from_millis(SAMPLE_PERIOD_MS));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sample_count: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(e) = net.heartbeat() {
                    error!("heartbeat: {}", e);
                }
                render(&net, json)?;
            }
            _ = sample.tick() => {
                // Small deterministic ripple around the configured code
                let ripple = [0i16, 3, -2, 1][(sample_count % 4) as usize];
                sample_count = sample_count.wrapping_add(1);
                let raw = (adc_code as i16).saturating_add(ripple).clamp(0, 4095) as u16;
                if let Err(e) = net.sample(raw) {
                    error!("sample: {}", e);
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        for key in line.bytes().filter(|&b| is_keypad_char(b)) {
                            if let Err(e) = net.press(key) {
                                warn!("key {}: {}", key as char, e);
                            }
                        }
                        render(&net, json)?;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&net.snapshot())?);
    }
    println!("Keynet simulator stopped");
    Ok(())
}

fn render(net: &Network, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(&net.snapshot())?);
        return Ok(());
    }

    let status = net.controller.get_status();
    let lock = match status.lock {
        LockState::Locked => "LOCKED".red().bold(),
        LockState::MidEntry { .. } => "ENTRY".yellow().bold(),
        LockState::Unlocked => "UNLOCKED".cyan().bold(),
    };
    let indicator = match status.indicator {
        StatusIndicator::WindowChange => " [window]".bright_yellow(),
        StatusIndicator::PatternChange => " [pattern]".bright_red(),
        _ => "".normal(),
    };

    let bar: String = (0..8)
        .rev()
        .map(|bit| if net.bar().shown() & (1 << bit) != 0 { '#' } else { '.' })
        .collect();

    let screen = net.lcd().screen();
    println!(
        "{}{}  bar {}  lcd |{:<16}| |{:<16}|",
        lock,
        indicator,
        bar.green(),
        screen.top.as_str(),
        screen.bottom.as_str()
    );

    if let Some(err) = status.last_error {
        println!("  {} {}", "last error:".red(), err);
    }
    Ok(())
}
