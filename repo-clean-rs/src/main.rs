use repo_clean_rs as rc;

fn main() {
  let opts = rc::opts::parse_args();
  if let Err(err) = rc::run(&opts) {
    eprintln!("repo-clean-rs: {err}");
    std::process::exit(err.exit_code());
  }
}
