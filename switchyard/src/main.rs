use std::process::ExitCode;

fn main() -> ExitCode {
    switchyard::logging::configure();

    let mode = std::env::args().nth(1);
    let code = match mode.as_deref() {
        Some("router") => switchyard::daemon::run_router(),
        _ => switchyard::daemon::run(),
    };

    ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1))
}
