fn main() -> anyhow::Result<()> {
    stickytrack_lib::run()
}
