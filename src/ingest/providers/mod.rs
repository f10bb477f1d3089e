pub mod netflix;
