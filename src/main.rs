fn main() {
    if let Err(err) = attribute_filler::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
