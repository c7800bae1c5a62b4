fn main() {
    if let Err(err) = sidekik::cli::main() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
