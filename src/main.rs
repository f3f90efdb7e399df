fn main() {
    webcam_screens_lib::run()
}
