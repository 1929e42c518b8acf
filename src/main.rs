fn main() {
    if let Err(err) = taskclock_lib::run() {
        eprintln!("taskclock: {err:#}");
        std::process::exit(1);
    }
}
