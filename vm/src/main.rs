use clap::Parser;
use mjvm_runtime::{Interpreter, VirtualMachine, VmConfig};
use std::path::PathBuf;
use tracing_log::log::debug;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[arg(
        short = 'c',
        long = "classpath",
        visible_alias = "cp",
        visible_alias = "class-path",
        value_delimiter = ';',
        help = "Classpath entries (directories only); use ';' as separator"
    )]
    pub class_path: Vec<PathBuf>,
    #[arg(
        help = "Main class to run from path that matches the package structure \
        (e.g. com.example.Main or com/example/Main for com/example/Main.class)"
    )]
    pub main_class_path: String,
    #[arg(help = "Arguments passed to the program's main(String[])")]
    pub main_args: Vec<String>,
}

fn create_vm_configuration(mut args: Args, main_class: String) -> VmConfig {
    if args.class_path.is_empty() {
        let current_dir = std::env::current_dir().expect("cannot get current dir");
        args.class_path.push(current_dir);
    }
    VmConfig::new(args.class_path, main_class, args.main_args)
}

#[hotpath::main]
fn main() {
    #[cfg(feature = "log-runtime-traces")]
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    debug!("Provided command line arguments: {:?}", args);

    let main_class = args.main_class_path.replace('.', "/");
    let vm_config = create_vm_configuration(args, main_class);

    let vm = VirtualMachine::new(vm_config);
    if let Err(e) = Interpreter::run_main(&vm) {
        eprintln!("Uncaught error: {e}");
        std::process::exit(1);
    }
}
