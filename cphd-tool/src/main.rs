use std::{io, ops::Range, path::PathBuf};

use clap::{Parser, Subcommand};
use cphd_tool::{
    commands,
    config::{parse_byte_size, parse_vector_range, ChannelShape, GenerateSpec, ToolConfig},
};
use cphd_types::{Compression, SignalFormat};
use log::{error, info, LevelFilter};

#[derive(Parser, Debug)]
#[command(
    name = "cphd-tool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect, generate and verify CPHD files",
    long_about = None,
)]
struct Cli {
    /// Рабочих потоков (по умолчанию: все ядра)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,
    /// Бюджет буферов чтения (64MiB, 1GB, 1048576)
    #[arg(long, global = true, default_value = "64MiB")]
    scratch: String,
    /// Целевой размер кадра записи
    #[arg(long, global = true, default_value = "1MiB")]
    block: String,
    /// Тихий режим (только ошибки)
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Подробный вывод
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Заголовок и метаданные файла
    Info {
        input: PathBuf,
        /// Вывести сводку в JSON
        #[arg(long)]
        json: bool,
    },
    /// PVP записи в JSON
    Pvp {
        input: PathBuf,
        /// Только этот канал
        #[arg(short, long)]
        channel: Option<usize>,
    },
    /// Синтетический файл
    Generate {
        output: PathBuf,
        /// Каналы VECTORSxSAMPLES, можно несколько
        #[arg(short, long = "channel", default_value = "256x1024")]
        channels: Vec<String>,
        /// Формат выборок: CI2, CI4, CF8
        #[arg(long, default_value = "CF8")]
        format: String,
        /// Сжатие: none, lz4
        #[arg(long, default_value = "none")]
        compress: String,
        /// Добавить опорные массивы усиления
        #[arg(long)]
        support: bool,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Полное декодирование с проверкой
    Verify { input: PathBuf },
    /// Выгрузка выборок канала (big-endian)
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        channel: usize,
        /// Диапазон векторов START..END
        #[arg(short, long)]
        range: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_generate_spec(
    channels: &[String],
    format: &str,
    compress: &str,
    support: bool,
    seed: u64,
) -> Result<GenerateSpec, String> {
    let channels = channels
        .iter()
        .map(|s| s.parse::<ChannelShape>())
        .collect::<Result<Vec<_>, _>>()?;

    let signal_format: SignalFormat = format.parse().map_err(|e| format!("--format: {e}"))?;
    let compression: Compression = compress.parse().map_err(|e| format!("--compress: {e}"))?;

    Ok(GenerateSpec {
        channels,
        signal_format,
        compression,
        with_support: support,
        seed,
    })
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    let mut cfg = ToolConfig::default();
    if let Some(threads) = cli.threads {
        cfg.threads = threads;
    }
    cfg.scratch_bytes = match parse_byte_size(&cli.scratch) {
        Ok(n) => n,
        Err(e) => {
            error!("--scratch: {e}");
            std::process::exit(1);
        }
    };
    cfg.block_bytes = match parse_byte_size(&cli.block) {
        Ok(n) => n,
        Err(e) => {
            error!("--block: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Info { input, json } => commands::info(&input, &cfg).and_then(|summary| {
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
            Ok(())
        }),
        Command::Pvp { input, channel } => commands::dump_pvp(&input, channel, &cfg, io::stdout()),
        Command::Generate {
            output,
            channels,
            format,
            compress,
            support,
            seed,
        } => {
            let spec = match parse_generate_spec(&channels, &format, &compress, support, seed) {
                Ok(spec) => spec,
                Err(e) => {
                    error!("{e}");
                    std::process::exit(1);
                }
            };
            commands::generate(&output, &spec, &cfg).map(|summary| {
                if !cli.quiet {
                    println!("{summary}");
                }
            })
        }
        Command::Verify { input } => commands::verify(&input, &cfg).map(|report| {
            info!("✓ {:?} verified", input);
            println!("{report}");
        }),
        Command::Extract {
            input,
            channel,
            range,
            output,
        } => {
            let range: Option<Range<usize>> = match range.as_deref().map(parse_vector_range).transpose() {
                Ok(r) => r,
                Err(e) => {
                    error!("--range: {e}");
                    std::process::exit(1);
                }
            };
            commands::extract(&input, channel, range, &output, &cfg)
                .map(|n| info!("{n} bytes written"))
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
