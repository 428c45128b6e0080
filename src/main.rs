use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    askdocs::cli::main()
}
