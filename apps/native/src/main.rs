use anyhow::{Context, Result};
use clap::Parser;
use core_types::{gps_info, gps_warn, GpsEvent, UartConfig};
use dec_nmea::{NmeaDecoder, NmeaSentence};
use gps_engine::GpsHandle;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use transport_native::{ReaderPump, SoftUartDriver};

const TAG: &str = "gps_reader";

/// Time left for the worker to drain the port after the input ends.
const DRAIN_MS: u64 = 500;

#[derive(Parser, Debug)]
#[command(name = "gps-reader", version, about = "Print NMEA sentences received from a GPS", long_about = None)]
struct Args {
    /// Byte source: serial device node or NMEA capture file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// UART configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Baud rate, overrides the configuration file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Line framing such as 8N1, overrides the configuration file
    #[arg(long)]
    framing: Option<String>,

    /// Seconds to listen before shutting down
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Replay the input at the configured baud rate (for capture files)
    #[arg(long, default_value_t = false)]
    pace: bool,
}

fn load_config(args: &Args) -> Result<UartConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open config file {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => UartConfig::default(),
    };

    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(framing) = &args.framing {
        config = config.with_framing(framing)?;
    }
    config.validate()?;
    Ok(config)
}

fn open_input(input: &str) -> Result<Box<dyn Read + Send>> {
    if input == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    let file = File::open(input).with_context(|| format!("cannot open input {}", input))?;
    Ok(Box::new(file))
}

fn log_event(event: &GpsEvent<NmeaSentence>) {
    match event {
        GpsEvent::NmeaUpdate(sentence) => log_sentence(sentence),
        GpsEvent::Unknown(_) => {
            let text = event.unknown_text().unwrap_or_default();
            gps_warn!(target: TAG, "Unknown statement: {}", text.trim_end());
        }
    }
}

fn log_sentence(sentence: &NmeaSentence) {
    match sentence {
        NmeaSentence::Gga(gga) => {
            gps_info!(target: TAG, "GGA sentence");
            gps_info!(target: TAG, "  Number of satellites: {:?}", gga.fix_satellites);
            gps_info!(target: TAG, "  Altitude: {:?} M", gga.altitude);
            if let (Some(lat), Some(lon)) = (gga.latitude, gga.longitude) {
                gps_info!(target: TAG, "  Position: {:.6}, {:.6}", lat, lon);
            }
        }
        NmeaSentence::Gll(gll) => {
            gps_info!(target: TAG, "GLL sentence");
            gps_info!(target: TAG, "  {:?}", gll);
        }
        NmeaSentence::Gsa(gsa) => {
            gps_info!(target: TAG, "GSA sentence");
            gps_info!(target: TAG, "  PDOP: {:?}", gsa.pdop);
            gps_info!(target: TAG, "  HDOP: {:?}", gsa.hdop);
            gps_info!(target: TAG, "  VDOP: {:?}", gsa.vdop);
        }
        NmeaSentence::Gsv(gsv) => {
            gps_info!(target: TAG, "GSV sentence");
            gps_info!(target: TAG, "  {:?}", gsv);
        }
        NmeaSentence::Rmc {
            data,
            magnetic_variation,
        } => {
            gps_info!(target: TAG, "RMC sentence");
            if let (Some(lat), Some(lon)) = (data.lat, data.lon) {
                gps_info!(target: TAG, "  Position: {:.6}, {:.6}", lat, lon);
            }
            gps_info!(target: TAG, "  Speed, in knots: {:?}", data.speed_over_ground);
            gps_info!(target: TAG, "  Track, in degrees: {:?}", data.true_course);
            match (magnetic_variation, data.true_course) {
                (Some(magvar), Some(track)) => {
                    let heading = magvar.adjust(f64::from(track));
                    gps_info!(
                        target: TAG,
                        "  Magnetic variation: {} {:?}",
                        magvar.degrees,
                        magvar.direction
                    );
                    gps_info!(target: TAG, "  Adjusted track (heading): {:.2}", heading);
                }
                _ => gps_info!(target: TAG, "  No magnetic variation"),
            }
        }
        NmeaSentence::Txt(txt) => {
            gps_info!(target: TAG, "TXT sentence");
            gps_info!(target: TAG, "  {:?}", txt);
        }
        NmeaSentence::Vtg(vtg) => {
            gps_info!(target: TAG, "VTG sentence");
            gps_info!(target: TAG, "  Track [deg]:   {:?}", vtg.true_course);
            gps_info!(target: TAG, "  Speed [knots]: {:?}", vtg.speed_over_ground);
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let mut driver = SoftUartDriver::new();
    let gps = GpsHandle::init(&config, &mut driver, NmeaDecoder::new()).context("GPS init failed")?;
    let handler = gps.add_handler(None, log_event)?;

    let pace = args.pace.then_some(config.baud_rate);
    let pump = ReaderPump::spawn(open_input(&args.input)?, driver.feeder(), pace)
        .context("cannot start input pump")?;
    gps_info!(target: TAG, "reading {} for {}s", args.input, args.duration);

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    while Instant::now() < deadline && !pump.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }
    if pump.is_finished() {
        thread::sleep(Duration::from_millis(DRAIN_MS));
    }
    pump.stop();

    gps.remove_handler(None, handler)?;
    gps.deinit().context("GPS deinit failed")?;

    // A blocking stdin read keeps the pump alive; only wait for it at EOF.
    if pump.is_finished() {
        let fed = pump.join()?;
        gps_info!(target: TAG, "{} bytes received", fed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dec_nmea::position_degrees;

    #[test]
    fn test_position_helper_matches_decoded_fix() {
        // 5321.6802 N is 53 degrees 21.6802 minutes
        assert!((position_degrees(53, 21.6802) - 53.36133).abs() < 1e-5);
    }

    #[test]
    fn test_config_overrides() {
        let args = Args::parse_from(["gps-reader", "--baud", "115200", "--framing", "7E1"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.framing(), "7E1");
    }

    #[test]
    fn test_bundled_config_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/gps.json");
        let args = Args::parse_from(["gps-reader", "--config", path]);
        assert_eq!(load_config(&args).unwrap(), UartConfig::default());
    }
}
