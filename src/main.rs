fn main() {
    ed3d_lib::run()
}
