use std::process::ExitCode;

fn main() -> ExitCode {
    // Commands report configuration problems themselves; logging just stays off.
    if let Err(error) = couponkit_cli::init_logging() {
        eprintln!("logging disabled: {error:#}");
    }
    couponkit_cli::run()
}
