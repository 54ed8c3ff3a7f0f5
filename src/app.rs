use crate::config::ConfigView;
use crate::event::bus::{EventBus, SharedSequence, Sink};
use crate::observability::logging::{
    CollectorLogger, LogHandle, LogLevel, LogRotationPolicy,
};
use crate::reactor::clock::{SystemClock, SystemTimeSource};
use crate::reactor::core::IterationHook;
use crate::reactor::poll::PollMultiplexer;
use crate::reactor::timer::Scheduler;
use crate::reactor::Reactor;
use crate::sinks::{FileSink, RelaySink};
use crate::sources::{DatagramSource, LineSource};
use crate::store::sink::{StoreSink, StoreSinkConfig};
use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

const DEFAULT_CONFIG_PATH: &str = "/etc/telwatch.json";

/// Application entrypoint: load configuration, bring up every usable sink
/// and source, and hand control to the reactor. A component that fails to
/// initialize is omitted; the process only refuses to start when no sink or
/// no source is usable.
pub fn run() -> Result<()> {
    let config_path = config_path_from_args(env::args().skip(1))?;
    let raw = fs::read_to_string(&config_path)
        .with_context(|| format!("cannot read config {}", config_path.display()))?;
    let root: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse config {}", config_path.display()))?;
    let config = ConfigView::new(root).context("invalid config root")?;

    let log = build_logger(&config)?;
    let clock = Rc::new(SystemClock::new());
    let time = Rc::new(SystemTimeSource);
    let scheduler = Scheduler::new(clock);
    let reactor = Reactor::new(PollMultiplexer::new(), scheduler.clone(), log.clone());
    let sequence = SharedSequence::new();
    let bus = Rc::new(EventBus::new(
        sequence.clone(),
        Rc::clone(&time) as Rc<dyn crate::reactor::TimeSource>,
    ));

    let mut sinks = 0usize;
    if let Some(section) = config.section("store")? {
        match StoreSinkConfig::from_config(&section)
            .map_err(anyhow::Error::from)
            .and_then(|cfg| {
                StoreSink::open(
                    cfg,
                    scheduler.clone(),
                    sequence.clone(),
                    Rc::clone(&time) as Rc<dyn crate::reactor::TimeSource>,
                    log.clone(),
                )
                .map_err(anyhow::Error::from)
            }) {
            Ok(sink) => {
                bus.register(sink as Rc<dyn Sink>);
                sinks += 1;
                log.info("app", "store sink ready");
            }
            Err(err) => log.error("app", &format!("store sink skipped: {err}")),
        }
    }
    if let Some(section) = config.section("file_sink")? {
        match FileSink::from_config(&section, log.clone()) {
            Ok(sink) => {
                bus.register(sink as Rc<dyn Sink>);
                sinks += 1;
                log.info("app", "file sink ready");
            }
            Err(err) => log.error("app", &format!("file sink skipped: {err}")),
        }
    }
    if let Some(section) = config.section("relay_sink")? {
        match RelaySink::from_config(&section, log.clone()) {
            Ok(sink) => {
                bus.register(sink as Rc<dyn Sink>);
                sinks += 1;
                log.info("app", "relay sink ready");
            }
            Err(err) => log.error("app", &format!("relay sink skipped: {err}")),
        }
    }
    if sinks == 0 {
        bail!("no usable sink configured");
    }

    let mut sources = 0usize;
    for (name, section_key) in [("datagram", "datagram_source"), ("relay", "relay_source")] {
        if let Some(section) = config.section(section_key)? {
            match section
                .required_str("listen")
                .map_err(anyhow::Error::from)
                .and_then(|listen| {
                    DatagramSource::bind(name, &listen, Rc::clone(&bus), log.clone())
                        .map_err(anyhow::Error::from)
                })
                .and_then(|source| {
                    source.attach(&reactor)?;
                    Ok(())
                }) {
                Ok(()) => {
                    sources += 1;
                    log.info("app", &format!("{name} source ready"));
                }
                Err(err) => log.error("app", &format!("{name} source skipped: {err}")),
            }
        }
    }
    for (name, section_key) in [("gps", "gps_source"), ("monitor", "monitor_source")] {
        if let Some(section) = config.section(section_key)? {
            match section
                .required_str("connect")
                .map_err(anyhow::Error::from)
                .and_then(|address| {
                    LineSource::connect(name, &address, Rc::clone(&bus), log.clone())
                        .map_err(anyhow::Error::from)
                })
                .and_then(|source| {
                    source.attach(&reactor)?;
                    Ok(())
                }) {
                Ok(()) => {
                    sources += 1;
                    log.info("app", &format!("{name} source ready"));
                }
                Err(err) => log.error("app", &format!("{name} source skipped: {err}")),
            }
        }
    }
    if sources == 0 {
        bail!("no usable source configured");
    }

    reactor.set_iteration_hook(Rc::clone(&bus) as Rc<dyn IterationHook>);
    log.info(
        "app",
        &format!("collector running with {sinks} sink(s), {sources} source(s)"),
    );
    reactor.run()
}

fn config_path_from_args(mut args: impl Iterator<Item = String>) -> Result<PathBuf> {
    let mut path = PathBuf::from(DEFAULT_CONFIG_PATH);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let Some(value) = args.next() else {
                    bail!("--config requires a path");
                };
                path = PathBuf::from(value);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(path)
}

fn build_logger(config: &ConfigView) -> Result<LogHandle> {
    let Some(section) = config.section("log")? else {
        return Ok(LogHandle::new(CollectorLogger::stderr(LogLevel::Info)));
    };
    let level = match section.opt_str("level")? {
        Some(name) => LogLevel::parse(&name)
            .with_context(|| format!("unknown log level '{name}'"))?,
        None => LogLevel::Info,
    };
    let logger = match section.opt_path("file")? {
        Some(path) => {
            let policy = LogRotationPolicy {
                max_bytes: section.u64_or("max_bytes", LogRotationPolicy::default().max_bytes)?,
                max_files: section
                    .u64_or("max_files", LogRotationPolicy::default().max_files as u64)?
                    as usize,
            };
            CollectorLogger::file(path, level, policy)?
        }
        None => CollectorLogger::stderr(level),
    };
    Ok(LogHandle::new(logger))
}
