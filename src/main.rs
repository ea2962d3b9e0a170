use design_token_bridge::{init_tracing, run_from_env};

fn main() {
    init_tracing();
    if let Err(err) = run_from_env() {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}
