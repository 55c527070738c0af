pub mod aggregate;
pub mod datetime;
pub mod logical;
pub mod math;
pub mod text;

pub fn load_builtins() {
    aggregate::register_builtins();
    datetime::register_builtins();
    logical::register_builtins();
    math::register_builtins();
    text::register_builtins();
}
