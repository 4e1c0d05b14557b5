fn main() -> std::process::ExitCode {
    sqlwarden_lib::run()
}
