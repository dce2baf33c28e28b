/*
 * Responsibility
 * - Cross-cutting HTTP layers shared by every route
 */
pub mod http;
