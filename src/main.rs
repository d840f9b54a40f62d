fn main() -> anyhow::Result<()> {
  app_lib::run()
}
