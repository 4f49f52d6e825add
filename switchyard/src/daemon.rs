//! Daemon entrypoint: a parent supervisor and a router child process.
//!
//! The parent translates OS signals into an orderly teardown: SIGTERM the
//! child, give it three seconds (the router polls once a second, workers
//! every 100 ms), then kill it outright. The child runs the router loop
//! on its own cooperative runtime and trips the shutdown token from its
//! own signal flags.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

use switchyard_broker::router::{Router, FRONTEND_ENDPOINT};
use switchyard_core::shutdown;

const CHILD_JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const POLL: Duration = Duration::from_millis(100);

/// Run the parent supervisor. Returns the process exit code: 0 on clean
/// shutdown, 1 when SIGINT initiated it, otherwise the child's code.
pub fn run() -> i32 {
    let term = Arc::new(AtomicBool::new(false));
    let int = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&term))
        .and(signal_hook::flag::register(SIGINT, Arc::clone(&int)))
    {
        error!("failed to install signal handlers: {e}");
        return 1;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            error!("cannot locate own executable: {e}");
            return 1;
        }
    };
    let mut child = match Command::new(exe).arg("router").spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("failed to spawn router process: {e}");
            return 1;
        }
    };
    info!("spawned router process {}", child.id());

    // Wait for a signal, or for the router to stop on its own.
    loop {
        if term.load(Ordering::Relaxed) || int.load(Ordering::Relaxed) {
            info!("received stop signal");
            break;
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                info!("router process exited with {status}");
                return status.code().unwrap_or(1);
            }
            Ok(None) => std::thread::sleep(POLL),
            Err(e) => {
                error!("failed to poll router process: {e}");
                break;
            }
        }
    }

    terminate(&child);
    let code = join_with_timeout(&mut child);

    if int.load(Ordering::Relaxed) {
        1
    } else {
        code
    }
}

/// Ask the child to stop.
fn terminate(child: &Child) {
    // SAFETY: plain kill(2) on the child's pid; no memory is involved.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

/// Join the child within the timeout, escalating to SIGKILL.
fn join_with_timeout(child: &mut Child) -> i32 {
    let deadline = Instant::now() + CHILD_JOIN_TIMEOUT;
    loop {
        match child.try_wait() {
            // Terminated by our signal means clean teardown.
            Ok(Some(status)) => return status.code().unwrap_or(0),
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!("router process did not stop in time, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return 0;
                }
                std::thread::sleep(POLL);
            }
            Err(e) => {
                error!("failed to join router process: {e}");
                return 1;
            }
        }
    }
}

/// Run the router child process to completion.
pub fn run_router() -> i32 {
    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&stop))
        .and(signal_hook::flag::register(SIGINT, Arc::clone(&stop)))
    {
        error!("failed to install signal handlers: {e}");
        return 1;
    }

    let runtime = match compio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return 1;
        }
    };

    runtime.block_on(async move {
        let (controller, token) = shutdown::channel();

        // Trip the token when a signal lands. The handle must stay alive
        // for the router's lifetime or the controller drops early.
        let _watcher = compio::runtime::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                compio::time::sleep(POLL).await;
            }
            info!("received stop signal");
            controller.shutdown();
        });

        match Router::bind(FRONTEND_ENDPOINT, token).await {
            Ok(router) => {
                router.run().await;
                0
            }
            Err(e) => {
                error!("failed to start router: {e}");
                1
            }
        }
    })
}
