fn main() {
    if let Err(err) = dogeledger_node::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
