fn main() {
    if let Err(error) = upres_cli::run_from_env() {
        tracing::error!("{error:#}");
        std::process::exit(1);
    }
}
