fn main() {
    realtime_mt::bootstrap_cli();
}
