fn main() {
    dose_reminder_lib::run()
}
