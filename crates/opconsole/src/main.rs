use opconsole::Application;

fn main() {
    std::process::exit(Application::new().run());
}
