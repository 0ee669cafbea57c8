pub fn main() {
    let code = match updatehub_agent::cli::main() {
        Ok(code) => code,
        Err(error) => {
            updatehub_cli::error!("{}", updatehub_agent::error::error_chain(&error));
            1
        }
    };
    std::process::exit(code);
}
