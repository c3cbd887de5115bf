pub mod clave;
pub mod images;
pub mod price;
