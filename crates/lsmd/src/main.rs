use clap::Parser;
use lsmd_core::lifecycle::{self, LifecycleState};
use lsmd_core::logging::{self, LoggingConfig};
use lsmd_core::multiplexer::{self, PollOutcome};
use lsmd_core::registry::Registry;
use lsmd_core::spawner::{self, SpawnConfig};
use lsmd_core::{config, discovery, privilege};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_PLUGIN_DIR: &str = "/usr/bin";
const DEFAULT_SOCKET_DIR: &str = "/var/run/lsm/ipc";
const DEFAULT_CONF_DIR: &str = "/etc/lsm/";
const LSMD_CONF_FILE: &str = "lsmd.conf";
const ALLOW_ROOT_OPT: &str = "allow-plugin-root-privilege";

/// libStorageMgmt plug-in supervisor daemon.
#[derive(Parser, Debug)]
#[command(name = "lsmd", about = "libStorageMgmt plug-in daemon")]
struct Cli {
    /// The directory where the plugins are located
    #[arg(long, default_value = DEFAULT_PLUGIN_DIR)]
    plugindir: PathBuf,

    /// The directory where the Unix domain sockets will be created
    #[arg(long, default_value = DEFAULT_SOCKET_DIR)]
    socketdir: PathBuf,

    /// The directory where the config files are located
    #[arg(long, default_value = DEFAULT_CONF_DIR)]
    confdir: PathBuf,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// New style daemon (systemd): log to stdout, do not daemonize
    #[arg(short = 'd')]
    systemd_mode: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::setup_logging(&LoggingConfig {
        verbose: cli.verbose,
        systemd_mode: cli.systemd_mode,
    }) {
        eprintln!("lsmd: failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => {
            logging::shutdown_logging();
            ExitCode::SUCCESS
        }
        Err(message) => {
            log::error!("{message}");
            logging::shutdown_logging();
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let lsmd_conf_path = cli.confdir.join(LSMD_CONF_FILE);
    let allow_plugin_root_privilege = config::parse_conf_bool(&lsmd_conf_path, ALLOW_ROOT_OPT)
        .map_err(|e| e.to_string())?
        .unwrap_or(false);

    let valgrind = std::env::var_os("LSM_VALGRIND").is_some();

    let lifecycle_state = lifecycle::install_signal_handlers().map_err(|e| e.to_string())?;

    if !allow_plugin_root_privilege {
        privilege::drop_privileges()?;
    }

    flight_check(&cli.socketdir, &cli.plugindir)?;

    if !cli.systemd_mode {
        nix::unistd::daemon(false, false).map_err(|e| format!("error calling daemon(): {e}"))?;
    }

    serve(cli, allow_plugin_root_privilege, &lifecycle_state, valgrind)?;

    Ok(())
}

/// Checks access to the directories of interest, mirroring the reference
/// daemon's `flight_check`: the socket directory must be readable and
/// writable, the plugin directory readable and searchable.
fn flight_check(socket_dir: &Path, plugin_dir: &Path) -> Result<(), String> {
    use nix::unistd::{access, AccessFlags};

    access(socket_dir, AccessFlags::R_OK | AccessFlags::W_OK)
        .map_err(|e| format!("unable to access socket directory {}: {e}", socket_dir.display()))?;
    access(plugin_dir, AccessFlags::R_OK | AccessFlags::X_OK)
        .map_err(|e| format!("unable to access plug-in directory {}: {e}", plugin_dir.display()))?;
    Ok(())
}

/// Runs the `RUNNING`/`RESTART`/`EXIT` outer loop. Returns the final
/// `allow_plugin_root_privilege` verdict observed (informational only; the
/// daemon is exiting by the time this returns).
fn serve(
    cli: &Cli,
    mut allow_plugin_root_privilege: bool,
    lifecycle_state: &std::sync::Arc<std::sync::atomic::AtomicUsize>,
    valgrind: bool,
) -> Result<bool, String> {
    loop {
        if lifecycle::read_state(lifecycle_state) == LifecycleState::Exit {
            return Ok(allow_plugin_root_privilege);
        }
        lifecycle::reset_to_running(lifecycle_state);

        log::info!("scanning plug-in directory {}", cli.plugindir.display());

        lsmd_core::socket_manager::sweep_stale_sockets(&cli.socketdir).map_err(|e| e.to_string())?;

        let (mut registry, has_root_plugin) =
            discovery::scan(&cli.plugindir, &cli.socketdir, &cli.confdir, allow_plugin_root_privilege)
                .map_err(|e| e.to_string())?;

        if allow_plugin_root_privilege && !has_root_plugin {
            log::info!("no plugin requires root privilege, dropping root privilege");
            flight_check(&cli.socketdir, &cli.plugindir)?;
            privilege::drop_privileges()?;
            allow_plugin_root_privilege = false;
        }

        let daemon_is_root = unsafe { libc::geteuid() } == 0;
        let spawn_config = SpawnConfig {
            allow_plugin_root_privilege,
            valgrind,
        };

        run_until_restart_or_exit(cli, &mut registry, lifecycle_state, daemon_is_root, &spawn_config)?;

        registry.clear();
        lsmd_core::socket_manager::sweep_stale_sockets(&cli.socketdir).map_err(|e| e.to_string())?;

        if lifecycle::read_state(lifecycle_state) == LifecycleState::Exit {
            return Ok(allow_plugin_root_privilege);
        }
        log::info!("reloading plug-ins");
    }
}

fn run_until_restart_or_exit(
    cli: &Cli,
    registry: &mut Registry,
    lifecycle_state: &std::sync::Arc<std::sync::atomic::AtomicUsize>,
    daemon_is_root: bool,
    spawn_config: &SpawnConfig,
) -> Result<(), String> {
    loop {
        if lifecycle::read_state(lifecycle_state) != LifecycleState::Running {
            return Ok(());
        }

        let plugin_dir_display = cli.plugindir.display().to_string();
        match multiplexer::poll_once(registry, &plugin_dir_display) {
            Ok(PollOutcome::Ready(accepted)) => {
                for (listen_fd, conn_fd) in accepted {
                    let Some(entry) = registry.find_by_fd(listen_fd) else {
                        unsafe { libc::close(conn_fd) };
                        continue;
                    };
                    let name = entry.name.clone();
                    let path = entry.executable_path.clone();
                    let requires_root = entry.requires_root;

                    if let Err(e) = spawner::spawn_plugin(
                        registry,
                        &name,
                        &path,
                        conn_fd,
                        requires_root,
                        daemon_is_root,
                        spawn_config,
                    ) {
                        log::info!("error spawning plugin {name}: {e}");
                    }
                }
            }
            Ok(PollOutcome::TimedOut) | Ok(PollOutcome::Interrupted) => {}
            Err(e) => return Err(e.to_string()),
        }

        lifecycle::reap_children();
    }
}
