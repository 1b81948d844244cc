use brook::{Client, DEFAULT_HOST, DEFAULT_PORT};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = BrookCli::parse();
    let addr = std::net::SocketAddr::new(cli.host, cli.port);
    let client = Client::connect(&addr).await?;

    one_shot_command(client, cli.command).await?;

    Ok(())
}

async fn one_shot_command(
    mut client: Client<tokio::net::TcpStream>,
    subcommand: BrookSubcommand,
) -> anyhow::Result<()> {
    match subcommand {
        BrookSubcommand::Ping { msg } => {
            let response = client.ping(msg.map(|s| s.into())).await?;
            println!("{}", String::from_utf8_lossy(response.as_ref()));
        }
        BrookSubcommand::Echo { msg } => {
            let response = client.echo(msg.into()).await?;
            println!("{}", String::from_utf8_lossy(response.as_ref()));
        }
        BrookSubcommand::Get { key } => {
            match client.get(&key).await? {
                Some(value) => println!("{}", String::from_utf8_lossy(value.as_ref())),
                None => println!("(nil)"),
            }
        }
        BrookSubcommand::Set {
            key,
            value,
            expire_unit,
            expires,
        } => {
            if let Some(duration) = to_duration(expire_unit, expires) {
                client
                    .set_expires(&key, Bytes::from(value), duration)
                    .await?;
            } else {
                client.set(&key, Bytes::from(value)).await?;
            }
            println!("OK");
        }
        BrookSubcommand::Rpush { key, values } => {
            let values = values.into_iter().map(Bytes::from).collect();
            let len = client.rpush(&key, values).await?;
            println!("{len}");
        }
        BrookSubcommand::Lpush { key, values } => {
            let values = values.into_iter().map(Bytes::from).collect();
            let len = client.lpush(&key, values).await?;
            println!("{len}");
        }
        BrookSubcommand::Lrange { key, start, stop } => {
            let values = client.lrange(&key, start, stop).await?;
            print_elements(&values);
        }
        BrookSubcommand::Llen { key } => {
            let len = client.llen(&key).await?;
            println!("{len}");
        }
        BrookSubcommand::Lpop { key, count } => {
            let values = client.lpop(&key, count).await?;
            if values.is_empty() {
                println!("(nil)");
            } else {
                print_elements(&values);
            }
        }
        BrookSubcommand::Blpop { key, timeout } => {
            match client.blpop(&key, timeout).await? {
                Some((key, element)) => {
                    println!("{key}");
                    println!("{}", String::from_utf8_lossy(element.as_ref()));
                }
                None => println!("(nil)"),
            }
        }
        BrookSubcommand::Type { key } => {
            println!("{}", client.key_type(&key).await?);
        }
        BrookSubcommand::Xadd { key, id, fields } => {
            let fields = fields
                .chunks(2)
                .map(|pair| match pair {
                    [name, value] => Ok((
                        Bytes::from(name.clone()),
                        Bytes::from(value.clone()),
                    )),
                    _ => Err(anyhow::anyhow!("field names and values must come in pairs")),
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let id = client.xadd(&key, &id, fields).await?;
            println!("{id}");
        }
        BrookSubcommand::Xrange { key, start, end } => {
            let entries = client.xrange(&key, &start, &end).await?;
            print_entries(&entries);
        }
        BrookSubcommand::Xread {
            block,
            streams,
            ids,
        } => {
            if streams.len() != ids.len() {
                anyhow::bail!("each stream key needs exactly one id");
            }
            let queries: Vec<(&str, &str)> = streams
                .iter()
                .map(String::as_str)
                .zip(ids.iter().map(String::as_str))
                .collect();
            let groups = client.xread(block, &queries).await?;
            if groups.is_empty() {
                println!("(nil)");
            }
            for (key, entries) in &groups {
                println!("{key}");
                print_entries(entries);
            }
        }
    };

    Ok(())
}

fn print_elements(values: &[Bytes]) {
    for (i, value) in values.iter().enumerate() {
        println!("{}) {}", i + 1, String::from_utf8_lossy(value.as_ref()));
    }
}

fn print_entries(entries: &[brook::stream::StreamEntry]) {
    for entry in entries {
        println!("{}", entry.id);
        for (name, value) in &entry.fields {
            println!(
                "  {} = {}",
                String::from_utf8_lossy(name.as_ref()),
                String::from_utf8_lossy(value.as_ref())
            );
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "brook-cli", version, author)]
/// A simple command line client for the brook server.
struct BrookCli {
    #[clap(subcommand)]
    command: BrookSubcommand,
    #[arg(long, default_value = DEFAULT_HOST)]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Debug, Subcommand)]
/// Subcommand to execute in one-shot command mode.
enum BrookSubcommand {
    /// Ping the server.
    Ping {
        /// Message to ping
        msg: Option<String>,
    },
    /// Echo a message back.
    Echo {
        /// Message to echo
        msg: String,
    },
    /// Get the value of key.
    Get {
        /// Name of key to get.
        key: String,
    },
    /// Set key to hold the string value.
    Set {
        /// Name of the key to set.
        key: String,
        /// Value to set.
        value: String,
        /// Expiration unit, can be either `ex` or `px`.
        #[arg(value_enum, requires = "expires")]
        expire_unit: Option<ExpirationUnit>,
        /// Expire the value after the specified amount of time.
        #[arg(requires = "expire_unit")]
        expires: Option<u64>,
    },
    /// Append values to the tail of the list at key.
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Prepend values to the head of the list at key.
    Lpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Print the inclusive slice [start..=stop] of the list at key.
    Lrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        stop: i64,
    },
    /// Print the length of the list at key.
    Llen { key: String },
    /// Pop elements from the head of the list at key.
    Lpop {
        key: String,
        /// How many elements to pop.
        count: Option<i64>,
    },
    /// Pop from the head of the list at key, blocking until an element
    /// arrives or the timeout (seconds, 0 = forever) elapses.
    Blpop { key: String, timeout: f64 },
    /// Print the kind of the value at key.
    Type { key: String },
    /// Append an entry to the stream at key.
    Xadd {
        key: String,
        /// Entry id: `*`, `<ms>-*` or `<ms>-<seq>`.
        id: String,
        /// Field names and values, alternating.
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Print the entries of the stream at key with ids in [start, end].
    Xrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: String,
        end: String,
    },
    /// Read entries strictly newer than the given ids from one or more streams.
    Xread {
        /// Block up to this many seconds (0 = forever) when nothing is new.
        #[arg(long)]
        block: Option<f64>,
        /// Stream keys.
        #[arg(required = true)]
        streams: Vec<String>,
        /// One last-seen id per stream key.
        #[arg(last = true, required = true)]
        ids: Vec<String>,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum ExpirationUnit {
    EX,
    PX,
}

fn to_duration(unit: Option<ExpirationUnit>, expires: Option<u64>) -> Option<Duration> {
    match (unit, expires) {
        (Some(ExpirationUnit::EX), Some(expires)) => Some(Duration::from_secs(expires)),
        (Some(ExpirationUnit::PX), Some(expires)) => Some(Duration::from_millis(expires)),
        _ => None,
    }
}
