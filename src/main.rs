fn main() -> anyhow::Result<()> {
    karmic_canteen_lib::run()
}
