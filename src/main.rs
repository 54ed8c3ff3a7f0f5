use std::process;

fn main() {
    if let Err(err) = telwatch::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
