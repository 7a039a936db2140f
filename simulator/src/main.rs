mod telemetry;

use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::{Duration, Instant};
use telemetry::{generate_reading, malformed_payload, topic_for};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Publishes factory sensor telemetry over MQTT")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Messages per second across all devices
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: u64,

    /// Fraction of readings with an out-of-range measurement
    #[arg(long, env = "OUTLIER_RATIO", default_value_t = 0.05)]
    outlier_ratio: f64,

    /// Fraction of messages that are not valid readings
    #[arg(long, env = "MALFORMED_RATIO", default_value_t = 0.01)]
    malformed_ratio: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.rate == 0 || args.devices == 0 {
        error!("--rate and --devices must be greater than zero");
        std::process::exit(2);
    }
    let outlier_ratio = args.outlier_ratio.clamp(0.0, 1.0);
    let malformed_ratio = args.malformed_ratio.clamp(0.0, 1.0);

    info!("Starting factory simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}, Outliers: {:.1}%, Malformed: {:.1}%",
        args.broker,
        args.port,
        args.rate,
        args.devices,
        outlier_ratio * 100.0,
        malformed_ratio * 100.0
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4().simple());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Publishing telemetry");

    let burst_size = args.rate.min(200);
    let burst_interval = Duration::from_millis(burst_size * 1000 / args.rate);
    let mut rng = rand::thread_rng();
    let mut counter = 0u64;

    loop {
        let burst_start = Instant::now();

        for _ in 0..burst_size {
            let device_id = format!("machine_{:02}", counter % args.devices);
            let topic = topic_for(&device_id);

            let payload = if rng.gen_bool(malformed_ratio) {
                malformed_payload(&mut rng, &device_id)
            } else {
                let reading = generate_reading(&mut rng, device_id, outlier_ratio);
                match serde_json::to_vec(&reading) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to serialize reading: {}", e);
                        continue;
                    }
                }
            };

            match client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => {
                    counter += 1;
                    if counter % 10000 == 0 {
                        info!("Published {} messages", counter);
                    }
                }
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?}; broker may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}
