mod helpers;
mod recover;
