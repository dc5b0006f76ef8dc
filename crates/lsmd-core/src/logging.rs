//! Two logging backends, matching the two run modes a plugin supervisor can be
//! started in: a foreground/systemd mode that logs to stdout, and a classic
//! daemon mode that logs to syslog. Nothing in between.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

/// `true` once syslog has been opened, so `Drop`-less shutdown can call `closelog`.
static SYSLOG_OPEN: AtomicBool = AtomicBool::new(false);

pub struct LoggingConfig {
    pub verbose: bool,
    pub systemd_mode: bool,
}

/// Installs the process-wide logger. Must be called once, before any other
/// thread or signal handler is registered.
pub fn setup_logging(conf: &LoggingConfig) -> Result<(), String> {
    let level = if conf.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };

    if conf.systemd_mode {
        fern::Dispatch::new()
            .format(|out, message, record| {
                let colored_level = match record.level() {
                    log::Level::Error => "\x1b[31mERROR\x1b[0m",
                    log::Level::Warn => "\x1b[33mWARN\x1b[0m",
                    log::Level::Info => "\x1b[32mINFO\x1b[0m",
                    log::Level::Debug => "\x1b[36mDEBUG\x1b[0m",
                    log::Level::Trace => "\x1b[90mTRACE\x1b[0m",
                };
                out.finish(format_args!(
                    "{}[{}] {}",
                    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                    colored_level,
                    message
                ))
            })
            .level(level)
            .chain(std::io::stdout())
            .apply()
            .map_err(|e| e.to_string())?;
    } else {
        open_syslog();
        log::set_boxed_logger(Box::new(SyslogLogger))
            .map(|()| log::set_max_level(level))
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn open_syslog() {
    let ident = CString::new("lsmd").unwrap();
    unsafe {
        // ident must outlive every subsequent syslog() call; leak it once.
        libc::openlog(
            Box::leak(ident.into_boxed_c_str()).as_ptr(),
            libc::LOG_ODELAY,
            libc::LOG_USER,
        );
    }
    SYSLOG_OPEN.store(true, Ordering::SeqCst);
}

/// Closes the syslog connection opened by `setup_logging`, if any. Safe to call
/// more than once.
pub fn shutdown_logging() {
    if SYSLOG_OPEN.swap(false, Ordering::SeqCst) {
        unsafe {
            libc::closelog();
        }
    }
}

struct SyslogLogger;

impl log::Log for SyslogLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let priority = match record.level() {
            log::Level::Error => libc::LOG_ERR,
            log::Level::Warn => libc::LOG_WARNING,
            log::Level::Info => libc::LOG_INFO,
            log::Level::Debug | log::Level::Trace => libc::LOG_DEBUG,
        };
        let message = format!("{}", record.args());
        if let Ok(c_message) = CString::new(message.replace('\0', "")) {
            let fmt = c"%s";
            unsafe {
                libc::syslog(priority, fmt.as_ptr(), c_message.as_ptr());
            }
        }
    }

    fn flush(&self) {}
}
